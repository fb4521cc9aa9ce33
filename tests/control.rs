use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use light_fx::protocol::{Request, Response};
use light_fx::{
    server, ChannelGateway, Dispatcher, EffectRequest, Engine, EngineConfig, LightHandle,
    SequenceDefinition,
};

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Client {
        let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Client {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn read_line(&mut self) -> Option<Value> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await.unwrap() {
            0 => None,
            _ => Some(serde_json::from_str(&line).unwrap()),
        }
    }

    async fn call(&mut self, request: &Request) -> Value {
        self.send_line(&serde_json::to_string(request).unwrap()).await;
        self.read_line().await.unwrap()
    }
}

async fn start_server() -> (std::net::SocketAddr, Arc<Engine>) {
    let (gateway, mut rx) = ChannelGateway::channel(64);
    // Keep the output drained
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let dispatcher = Dispatcher::new(Arc::new(gateway), 16, Duration::from_millis(50));
    let config = EngineConfig {
        sequences: vec![SequenceDefinition {
            name: "living_room".to_string(),
            lights: vec![LightHandle::new("light.a"), LightHandle::new("light.b")],
            default_effect: None,
            defaults: EffectRequest::default(),
        }],
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::new(config, Arc::new(dispatcher)).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, engine.clone()));

    (addr, engine)
}

#[tokio::test]
async fn start_status_stop_over_tcp() {
    let (addr, engine) = start_server().await;
    let mut client = Client::connect(addr).await;

    let start = Request::StartEffect {
        sequence: "living_room".to_string(),
        effect: "twinkle".to_string(),
        config: EffectRequest {
            intensity: 40.0,
            palette_name: "fire".to_string(),
            ..EffectRequest::default()
        },
    };
    assert_eq!(client.call(&start).await, json!({"result": "ok"}));

    let status = client
        .call(&Request::Status {
            sequence: Some("living_room".to_string()),
        })
        .await;
    assert_eq!(status["result"], "status");
    assert_eq!(status["sequences"][0]["state"], "running");
    assert_eq!(status["sequences"][0]["effect"], "twinkle");
    assert_eq!(status["sequences"][0]["palette"], "fire");
    assert_eq!(status["sequences"][0]["intensity"], 40.0);
    assert_eq!(status["sequences"][0]["lights"], json!(["light.a", "light.b"]));

    let response: Response = serde_json::from_value(
        client
            .call(&Request::StopEffect {
                sequence: "living_room".to_string(),
            })
            .await,
    )
    .unwrap();
    assert_eq!(response, Response::Ok);

    let status = engine.status(Some("living_room")).await.unwrap();
    assert_eq!(status[0].state, light_fx::sequence::StateSnapshot::Idle);
}

#[tokio::test]
async fn errors_come_back_as_responses() {
    let (addr, _engine) = start_server().await;
    let mut client = Client::connect(addr).await;

    let unknown = client
        .call(&Request::StopEffect {
            sequence: "attic".to_string(),
        })
        .await;
    assert_eq!(
        unknown,
        json!({"result": "error", "kind": "UnknownSequence", "message": "Unknown sequence: attic"})
    );

    let bad_effect = client
        .call(&Request::StartEffect {
            sequence: "living_room".to_string(),
            effect: "strobe".to_string(),
            config: EffectRequest::default(),
        })
        .await;
    assert_eq!(bad_effect["kind"], "UnknownEffect");

    let bad_config = client
        .call(&Request::StartEffect {
            sequence: "living_room".to_string(),
            effect: "rainbow".to_string(),
            config: EffectRequest {
                speed: -2.0,
                ..EffectRequest::default()
            },
        })
        .await;
    assert_eq!(bad_config["kind"], "InvalidConfig");

    // Garbage gets an answer and the connection survives
    client.send_line("{ not json").await;
    let garbage = client.read_line().await.unwrap();
    assert_eq!(garbage["result"], "error");
    assert_eq!(garbage["kind"], "InvalidRequest");

    let listing = client.call(&Request::List).await;
    assert_eq!(
        listing,
        json!({
            "result": "list",
            "effects": ["rainbow", "color_wipe", "twinkle"],
            "palettes": ["fire", "rainbow"],
            "sequences": ["living_room"],
        })
    );
}

#[tokio::test]
async fn overlong_lines_close_the_connection() {
    let (addr, _engine) = start_server().await;
    let mut client = Client::connect(addr).await;

    let huge = format!(r#"{{"service":"list","padding":"{}"}}"#, "x".repeat(70 * 1024));
    // The server may hang up before reading everything
    let _ = client.writer.write_all(huge.as_bytes()).await;
    let _ = client.writer.write_all(b"\n").await;

    let mut line = String::new();
    let read = client.reader.read_line(&mut line).await;
    assert!(matches!(read, Ok(0) | Err(_)));
}
