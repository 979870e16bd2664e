//! Push-style topic listeners.
//!
//! The control logic never polls the bus.  Each consumer implements
//! [`MessageListener`] and is attached to a topic with [`spawn_listener`],
//! which drains that topic on its own Tokio task.  Two topics are therefore
//! handled concurrently, while payloads on one topic reach a listener in
//! publish order.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{EventBus, Topic};

/// A consumer of raw topic payloads.
///
/// # Contract
///
/// `on_message` must not panic across the task boundary for ordinary bad
/// input; malformed payloads are the listener's problem to log and drop.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message(&self, topic: Topic, payload: &str);
}

impl<F> MessageListener for F
where
    F: Fn(Topic, &str) + Send + Sync + 'static,
{
    fn on_message(&self, topic: Topic, payload: &str) {
        self(topic, payload)
    }
}

/// Subscribe `listener` to `topic` and drive it from a background task.
///
/// The subscription is taken before this function returns, so anything
/// published afterwards reaches the listener.  The task ends when the bus is
/// dropped or the returned handle is aborted.
pub fn spawn_listener(
    bus: &EventBus,
    topic: Topic,
    listener: Arc<dyn MessageListener>,
) -> JoinHandle<()> {
    let mut receiver = bus.subscribe_to(topic);
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(payload) => listener.on_message(topic, &payload),
                Err(RecvError::Lagged(n)) => {
                    warn!(%topic, lagged_by = n, "listener lagged; messages dropped");
                }
                Err(RecvError::Closed) => {
                    debug!(%topic, "bus closed; listener stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn listener_receives_payloads_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let seen: Arc<Mutex<Vec<(Topic, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = spawn_listener(
            &bus,
            Topic::HopperEvent,
            Arc::new(move |topic: Topic, payload: &str| {
                sink.lock().unwrap().push((topic, payload.to_string()));
            }),
        );

        bus.publish_to(Topic::HopperEvent, "a".to_string())?;
        bus.publish_to(Topic::HopperEvent, "b".to_string())?;

        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (Topic::HopperEvent, "a".to_string()),
                (Topic::HopperEvent, "b".to_string())
            ]
        );
        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn listener_stops_when_bus_dropped() {
        let bus = EventBus::default();
        let handle = spawn_listener(&bus, Topic::PayoutEvent, Arc::new(|_: Topic, _: &str| {}));
        drop(bus);

        let finished = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(finished.is_ok(), "listener task must end once the bus is gone");
    }
}
