//! Fire-and-forget submission of light commands
//!
//! Every command runs in its own task, bounded by a semaphore and a timeout,
//! so a slow light never holds up a tick. When no permit frees up before the
//! tick deadline the command is dropped: the next tick carries a newer frame
//! anyway.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::EngineError;
use crate::gateway::{LightCommand, LightGateway};
use crate::sequence::LightHandle;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
    pub in_flight: u64,
}

#[derive(Default)]
struct Shared {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Lights whose last command failed, so repeats don't flood the log
    failing: Mutex<HashSet<LightHandle>>,
}

impl Shared {
    fn succeeded(&self, light: &LightHandle) {
        self.sent.fetch_add(1, Ordering::Relaxed);

        let recovered = match self.failing.lock() {
            Ok(mut failing) => failing.remove(light),
            Err(_) => false,
        };
        if recovered {
            log::info!("Light {} is responding again", light);
        }
    }

    fn failed(&self, light: &LightHandle, err: &EngineError) {
        self.failed.fetch_add(1, Ordering::Relaxed);

        let first = match self.failing.lock() {
            Ok(mut failing) => failing.insert(light.clone()),
            Err(_) => true,
        };
        if first {
            log::warn!("{}", err);
        } else {
            log::debug!("{}", err);
        }
    }
}

pub struct Dispatcher {
    gateway: Arc<dyn LightGateway>,
    permits: Arc<Semaphore>,
    capacity: u32,
    timeout: Duration,
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn LightGateway>, max_in_flight: u32, timeout: Duration) -> Dispatcher {
        let capacity = max_in_flight.max(1);

        Dispatcher {
            gateway,
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            timeout,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn dispatch(&self, command: LightCommand) -> bool {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                self.spawn(command, permit);
                true
            }
            Err(_) => {
                self.drop_command(&command);
                false
            }
        }
    }

    /// Submit, waiting for a free slot until `deadline` at the latest.
    pub async fn dispatch_by(&self, command: LightCommand, deadline: Instant) -> bool {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(_) => match tokio::time::timeout_at(deadline, self.permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => Ok(permit),
                _ => Err(()),
            },
        };

        match permit {
            Ok(permit) => {
                self.spawn(command, permit);
                true
            }
            Err(()) => {
                self.drop_command(&command);
                false
            }
        }
    }

    fn drop_command(&self, command: &LightCommand) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        log::trace!("Dispatch saturated, dropping command for {}", command.light);
    }

    /// Submit, waiting as long as it takes for a free slot.
    pub async fn deliver(&self, command: LightCommand) {
        match self.permits.clone().acquire_owned().await {
            Ok(permit) => self.spawn(command, permit),
            // Only happens if the semaphore is closed, which we never do
            Err(_) => log::error!("Dispatch closed, lost command for {}", command.light),
        }
    }

    fn spawn(&self, command: LightCommand, permit: OwnedSemaphorePermit) {
        let light = command.light.clone();
        let timeout = self.timeout;
        let shared = self.shared.clone();

        log::trace!("Sending {:?}", command);
        let call = self.gateway.set_light(command);

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::DispatchFailure {
                    light: light.to_string(),
                    reason: format!("no response within {:?}", timeout),
                }),
            };

            match result {
                Ok(()) => shared.succeeded(&light),
                Err(e) => shared.failed(&light, &e),
            }

            drop(permit);
        });
    }

    /// Wait for everything in flight to finish, up to `timeout`. Returns
    /// whether it drained in time.
    pub async fn flush(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.permits.acquire_many(self.capacity)).await,
            Ok(Ok(_))
        )
    }

    pub fn stats(&self) -> DispatchStats {
        let available = self.permits.available_permits() as u64;

        DispatchStats {
            sent: self.shared.sent.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            in_flight: u64::from(self.capacity).saturating_sub(available),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use futures::future::{self, BoxFuture};
    use futures::FutureExt;

    use super::*;

    /// Answers after `delay`, failing while `broken` is set
    struct TestGateway {
        delay: Option<Duration>,
        broken: AtomicBool,
        calls: Mutex<Vec<LightCommand>>,
    }

    impl TestGateway {
        fn new(delay: Option<Duration>) -> Arc<TestGateway> {
            Arc::new(TestGateway {
                delay,
                broken: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl LightGateway for TestGateway {
        fn set_light(&self, command: LightCommand) -> BoxFuture<'static, Result<(), EngineError>> {
            let light = command.light.to_string();
            let broken = self.broken.load(Ordering::SeqCst);
            let delay = self.delay;
            self.calls.lock().unwrap().push(command);

            async move {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => future::pending::<()>().await,
                }

                if broken {
                    Err(EngineError::DispatchFailure {
                        light,
                        reason: "unreachable".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    fn off(light: &str) -> LightCommand {
        LightCommand::off(light.into(), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn counts_successes_and_failures() {
        let gateway = TestGateway::new(Some(Duration::from_millis(5)));
        let dispatcher = Dispatcher::new(gateway.clone(), 8, Duration::from_secs(1));

        assert!(dispatcher.dispatch(off("light.a")));
        assert!(dispatcher.flush(Duration::from_secs(5)).await);

        gateway.broken.store(true, Ordering::SeqCst);
        dispatcher.dispatch(off("light.a"));
        dispatcher.dispatch(off("light.b"));
        assert!(dispatcher.flush(Duration::from_secs(5)).await);

        {
            let failing = dispatcher.shared.failing.lock().unwrap();
            assert!(failing.contains(&LightHandle::new("light.a")));
            assert!(failing.contains(&LightHandle::new("light.b")));
        }

        gateway.broken.store(false, Ordering::SeqCst);
        dispatcher.dispatch(off("light.a"));
        assert!(dispatcher.flush(Duration::from_secs(5)).await);

        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.in_flight, 0);
        assert!(!dispatcher
            .shared
            .failing
            .lock()
            .unwrap()
            .contains(&LightHandle::new("light.a")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lights_time_out() {
        let gateway = TestGateway::new(None);
        let dispatcher = Dispatcher::new(gateway, 4, Duration::from_millis(50));

        dispatcher.dispatch(off("light.slow"));
        assert_eq!(dispatcher.stats().in_flight, 1);

        assert!(dispatcher.flush(Duration::from_secs(1)).await);
        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_dispatch_drops_commands() {
        let gateway = TestGateway::new(None);
        let dispatcher = Dispatcher::new(gateway.clone(), 1, Duration::from_secs(3600));

        assert!(dispatcher.dispatch(off("light.a")));
        assert!(!dispatcher.dispatch(off("light.b")));

        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(gateway.calls.lock().unwrap().len(), 1);

        assert!(!dispatcher.flush(Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_by_waits_until_the_deadline() {
        let gateway = TestGateway::new(Some(Duration::from_millis(10)));
        let dispatcher = Dispatcher::new(gateway.clone(), 1, Duration::from_secs(1));

        assert!(dispatcher.dispatch(off("light.a")));
        // light.a finishes after 10ms, well before the deadline
        let deadline = Instant::now() + Duration::from_millis(50);
        assert!(dispatcher.dispatch_by(off("light.b"), deadline).await);

        // light.b holds the only slot past this deadline
        let deadline = Instant::now() + Duration::from_millis(1);
        assert!(!dispatcher.dispatch_by(off("light.c"), deadline).await);

        assert!(dispatcher.flush(Duration::from_secs(1)).await);
        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(gateway.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_waits_for_a_slot() {
        let gateway = TestGateway::new(Some(Duration::from_millis(100)));
        let dispatcher = Dispatcher::new(gateway.clone(), 1, Duration::from_secs(1));

        dispatcher.dispatch(off("light.a"));
        dispatcher.deliver(off("light.b")).await;
        assert!(dispatcher.flush(Duration::from_secs(1)).await);

        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped, 0);

        let lights: Vec<String> = gateway
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.light.to_string())
            .collect();
        assert_eq!(lights, ["light.a", "light.b"]);
    }
}
