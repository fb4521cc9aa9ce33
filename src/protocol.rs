//! Control protocol
//!
//! Newline delimited JSON. Each request line is a service call
//! `{"service": .., "data": {..}}`; each gets exactly one response line.

use anyhow::{anyhow, Error};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::codec::{Decoder, Encoder};

use crate::effect::EffectRequest;
use crate::error::EngineError;
use crate::scheduler::Listing;
use crate::sequence::SequenceStatus;

/// Longest request line accepted before the connection is dropped
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const SERVICE_START_EFFECT: &str = "start_effect";
const SERVICE_STOP_EFFECT: &str = "stop_effect";
const SERVICE_STATUS: &str = "status";
const SERVICE_LIST: &str = "list";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Request {
    StartEffect {
        sequence: String,
        effect: String,
        config: EffectRequest,
    },
    StopEffect {
        sequence: String,
    },
    Status {
        sequence: Option<String>,
    },
    List,
}

/// The wire shape of a request
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    service: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
}

#[derive(Deserialize)]
struct StartData {
    sequence: String,
    effect: String,
    #[serde(default)]
    config: EffectRequest,
}

#[derive(Deserialize)]
struct StopData {
    sequence: String,
}

#[derive(Deserialize)]
struct StatusData {
    #[serde(default)]
    sequence: Option<String>,
}

fn data<T: serde::de::DeserializeOwned>(service: &str, data: Value) -> Result<T, String> {
    let data = if data.is_null() { json!({}) } else { data };
    serde_json::from_value(data).map_err(|e| format!("bad data for {}: {}", service, e))
}

impl TryFrom<Envelope> for Request {
    type Error = String;

    fn try_from(envelope: Envelope) -> Result<Request, String> {
        let service = envelope.service.as_str();

        match service {
            SERVICE_START_EFFECT => {
                let StartData {
                    sequence,
                    effect,
                    config,
                } = data(service, envelope.data)?;
                Ok(Request::StartEffect {
                    sequence,
                    effect,
                    config,
                })
            }
            SERVICE_STOP_EFFECT => {
                let StopData { sequence } = data(service, envelope.data)?;
                Ok(Request::StopEffect { sequence })
            }
            SERVICE_STATUS => {
                let StatusData { sequence } = data(service, envelope.data)?;
                Ok(Request::Status { sequence })
            }
            SERVICE_LIST => Ok(Request::List),
            other => Err(format!("unknown service {}", other)),
        }
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Envelope {
        let (service, data) = match request {
            Request::StartEffect {
                sequence,
                effect,
                config,
            } => (
                SERVICE_START_EFFECT,
                json!({ "sequence": sequence, "effect": effect, "config": config }),
            ),
            Request::StopEffect { sequence } => (SERVICE_STOP_EFFECT, json!({ "sequence": sequence })),
            Request::Status { sequence } => (SERVICE_STATUS, json!({ "sequence": sequence })),
            Request::List => (SERVICE_LIST, Value::Null),
        };

        Envelope {
            service: service.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Status { sequences: Vec<SequenceStatus> },
    List(Listing),
    Error { kind: String, message: String },
}

impl Response {
    pub fn invalid_request(message: impl Into<String>) -> Response {
        Response::Error {
            kind: "InvalidRequest".to_string(),
            message: message.into(),
        }
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Response {
        Response::Error {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Splits the byte stream into request lines.
///
/// A line that isn't a valid request decodes to `Some(Err(..))` so the caller
/// can answer it and carry on. Only an over-long line is a stream error.
pub struct ControlCodec {
    max_length: usize,
    /// Where to resume the newline search
    next_index: usize,
}

impl ControlCodec {
    pub fn new() -> ControlCodec {
        ControlCodec::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> ControlCodec {
        ControlCodec {
            max_length,
            next_index: 0,
        }
    }

    fn parse(line: &[u8]) -> Result<Request, serde_json::Error> {
        serde_json::from_slice(line)
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        ControlCodec::new()
    }
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

impl Decoder for ControlCodec {
    type Item = Result<Request, serde_json::Error>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            match newline {
                Some(offset) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;

                    if end > self.max_length {
                        return Err(anyhow!("Control line longer than {} bytes", self.max_length));
                    }

                    let line = src.split_to(end + 1);
                    let line = trim(&line);

                    // Blank lines are keep-alives
                    if line.is_empty() {
                        continue;
                    }

                    return Ok(Some(ControlCodec::parse(line)));
                }
                None => {
                    if src.len() > self.max_length {
                        return Err(anyhow!("Control line longer than {} bytes", self.max_length));
                    }

                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        // Last line without a trailing newline
        self.next_index = 0;
        let rest = src.split();
        let line = trim(&rest);
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ControlCodec::parse(line)))
        }
    }
}

impl Encoder<Response> for ControlCodec {
    type Error = Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Error> {
        let payload = serde_json::to_vec(&item)?;

        dst.reserve(payload.len() + 1);
        dst.put_slice(&payload);
        dst.put_u8(b'\n');

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut ControlCodec, input: &str) -> Vec<Result<Request, serde_json::Error>> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn decodes_each_service() {
        let mut codec = ControlCodec::new();
        let input = concat!(
            r#"{"service":"start_effect","data":{"sequence":"porch","effect":"twinkle","config":{"speed":80,"palette":"fire"}}}"#,
            "\n",
            r#"{"service":"stop_effect","data":{"sequence":"porch"}}"#,
            "\r\n",
            "\n",
            r#"{"service":"status"}"#,
            "\n",
            r#"{"service":"list"}"#,
            "\n",
        );

        let requests: Vec<Request> = decode_all(&mut codec, input)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(
            requests,
            [
                Request::StartEffect {
                    sequence: "porch".to_string(),
                    effect: "twinkle".to_string(),
                    config: EffectRequest {
                        speed: 80.0,
                        palette_name: "fire".to_string(),
                        ..EffectRequest::default()
                    },
                },
                Request::StopEffect {
                    sequence: "porch".to_string()
                },
                Request::Status { sequence: None },
                Request::List,
            ]
        );
    }

    #[test]
    fn waits_for_a_full_line() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(r#"{"service":"li"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"st\"}\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), Request::List);
        assert!(buf.is_empty());
    }

    #[test]
    fn malformed_lines_are_items_not_stream_errors() {
        let mut codec = ControlCodec::new();
        let items = decode_all(
            &mut codec,
            "not json\n{\"service\":\"dance\"}\n{\"service\":\"stop_effect\"}\n{\"service\":\"list\"}\n",
        );

        assert_eq!(items.len(), 4);
        assert!(items[0].is_err());
        assert!(items[1].as_ref().unwrap_err().to_string().contains("unknown service dance"));
        assert!(items[2].is_err());
        assert_eq!(items[3].as_ref().unwrap(), &Request::List);
    }

    #[test]
    fn overlong_lines_are_fatal() {
        let mut codec = ControlCodec::with_max_length(16);

        let mut buf = BytesMut::from("x".repeat(17).as_str());
        assert!(codec.decode(&mut buf).is_err());

        let mut codec = ControlCodec::with_max_length(16);
        let mut buf = BytesMut::from(format!("{}\n", "y".repeat(20)).as_str());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn final_line_without_newline() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(r#"{"service":"list"}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap().unwrap(), Request::List);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encodes_responses_as_lines() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Response::Ok, &mut buf).unwrap();
        codec
            .encode(EngineError::UnknownSequence("attic".to_string()).into(), &mut buf)
            .unwrap();

        let text = std::str::from_utf8(&buf).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines[0], json!({"result": "ok"}));
        assert_eq!(
            lines[1],
            json!({"result": "error", "kind": "UnknownSequence", "message": "Unknown sequence: attic"})
        );
    }

    #[test]
    fn requests_serialize_to_the_wire_shape() {
        let value = serde_json::to_value(Request::StopEffect {
            sequence: "porch".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"service": "stop_effect", "data": {"sequence": "porch"}}));

        assert_eq!(serde_json::to_value(Request::List).unwrap(), json!({"service": "list"}));
    }
}
