//! Headless, topic-based publish/subscribe bus carrying JSON payloads.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::KioskStatus`] | Our own lifecycle announcements |
//! | [`Topic::PayoutEvent`] | Payout session started / exiting |
//! | [`Topic::HopperRequest`] | Commands to the coin hopper |
//! | [`Topic::HopperResponse`] | Correlated hopper answers |
//! | [`Topic::HopperEvent`] | Unsolicited hopper events |
//! | [`Topic::ValidatorRequest`] | Commands to the note validator |
//! | [`Topic::ValidatorResponse`] | Correlated validator answers |
//! | [`Topic::ValidatorEvent`] | Unsolicited validator events |
//!
//! Delivery order is only guaranteed per topic; nothing orders two topics
//! relative to each other.

use changeomatic_types::KioskError;
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered payloads before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Every routing topic on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    KioskStatus,
    PayoutEvent,
    HopperRequest,
    HopperResponse,
    HopperEvent,
    ValidatorRequest,
    ValidatorResponse,
    ValidatorEvent,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::KioskStatus,
        Topic::PayoutEvent,
        Topic::HopperRequest,
        Topic::HopperResponse,
        Topic::HopperEvent,
        Topic::ValidatorRequest,
        Topic::ValidatorResponse,
        Topic::ValidatorEvent,
    ];

    /// Canonical topic name as seen by the devices.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::KioskStatus => "changeomatic-event",
            Topic::PayoutEvent => "payout-event",
            Topic::HopperRequest => "hopper-request",
            Topic::HopperResponse => "hopper-response",
            Topic::HopperEvent => "hopper-event",
            Topic::ValidatorRequest => "validator-request",
            Topic::ValidatorResponse => "validator-response",
            Topic::ValidatorEvent => "validator-event",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fire-and-forget publishing seam.
///
/// The control logic only ever publishes through this trait so that tests can
/// swap the bus for a recorder.
pub trait Publisher: Send + Sync {
    /// Hand `payload` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers reached.  There is no delivery
    /// confirmation beyond that.
    fn publish(&self, topic: Topic, payload: String) -> Result<usize, KioskError>;
}

/// Shared message bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    kiosk_status: broadcast::Sender<String>,
    payout_event: broadcast::Sender<String>,
    hopper_request: broadcast::Sender<String>,
    hopper_response: broadcast::Sender<String>,
    hopper_event: broadcast::Sender<String>,
    validator_request: broadcast::Sender<String>,
    validator_response: broadcast::Sender<String>,
    validator_event: broadcast::Sender<String>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let channel = || broadcast::channel::<String>(capacity).0;
        Self {
            kiosk_status: channel(),
            payout_event: channel(),
            hopper_request: channel(),
            hopper_response: channel(),
            hopper_event: channel(),
            validator_request: channel(),
            validator_response: channel(),
            validator_event: channel(),
        }
    }

    /// Publish `payload` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the payload,
    /// or [`KioskError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, payload: String) -> Result<usize, KioskError> {
        self.topic_sender(topic)
            .send(payload)
            .map_err(|_| KioskError::Channel(format!("no subscribers for topic {topic}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    ///
    /// Only payloads published after this call are delivered.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<String> {
        match topic {
            Topic::KioskStatus => &self.kiosk_status,
            Topic::PayoutEvent => &self.payout_event,
            Topic::HopperRequest => &self.hopper_request,
            Topic::HopperResponse => &self.hopper_response,
            Topic::HopperEvent => &self.hopper_event,
            Topic::ValidatorRequest => &self.validator_request,
            Topic::ValidatorResponse => &self.validator_response,
            Topic::ValidatorEvent => &self.validator_event,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Publisher for EventBus {
    fn publish(&self, topic: Topic, payload: String) -> Result<usize, KioskError> {
        self.publish_to(topic, payload)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<String>,
}

impl TopicReceiver {
    /// Wait for the next payload on this topic.
    ///
    /// Returns:
    /// * `Ok(payload)` – a successfully received payload.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<String, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::HopperRequest);

        let reached = bus.publish_to(Topic::HopperRequest, r#"{"cmd":"enable"}"#.to_string())?;
        assert_eq!(reached, 1);

        let received = rx.recv().await?;
        assert_eq!(received, r#"{"cmd":"enable"}"#);
        assert_eq!(rx.topic(), Topic::HopperRequest);
        Ok(())
    }

    #[test]
    fn publish_no_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::ValidatorRequest, "{}".to_string());
        assert!(matches!(result, Err(KioskError::Channel(_))));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_payload() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::HopperEvent);
        let mut second = bus.subscribe_to(Topic::HopperEvent);

        bus.publish_to(Topic::HopperEvent, "x".to_string())?;

        assert_eq!(first.recv().await?, "x");
        assert_eq!(second.recv().await?, "x");
        Ok(())
    }

    /// A subscriber on `ValidatorEvent` must not see `HopperEvent` traffic.
    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut validator = bus.subscribe_to(Topic::ValidatorEvent);
        let _hopper = bus.subscribe_to(Topic::HopperEvent);

        bus.publish_to(Topic::HopperEvent, "floated".to_string())?;

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            validator.recv(),
        )
        .await;
        assert!(result.is_err(), "validator subscriber must not receive hopper traffic");
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::HopperEvent);

        for i in 0..1_000 {
            let _ = bus.publish_to(Topic::HopperEvent, i.to_string());
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn topic_names_are_unique() {
        let mut names: Vec<&str> = Topic::ALL.iter().map(Topic::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Topic::ALL.len());
        assert_eq!(Topic::HopperResponse.to_string(), "hopper-response");
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(Topic::PayoutEvent), 0);
        let rx = bus.subscribe_to(Topic::PayoutEvent);
        assert_eq!(bus.subscriber_count(Topic::PayoutEvent), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(Topic::PayoutEvent), 0);
    }
}
