//! Test doubles shared by the kernel's unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use changeomatic_middleware::{Publisher, Topic};
use changeomatic_types::{DeviceMessage, KioskError};
use parking_lot::Mutex;

type Inspector = Box<dyn Fn(&DeviceMessage) + Send + Sync>;

/// A [`Publisher`] that decodes and keeps everything it is handed.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    sent: Mutex<Vec<(Topic, DeviceMessage)>>,
    fail: AtomicBool,
    inspector: Mutex<Option<Inspector>>,
    inspections: AtomicUsize,
}

impl RecordingPublisher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail like a bus with no subscribers.
    pub(crate) fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Run `inspect` on each message at the moment it is published.
    pub(crate) fn before_publish<F>(&self, inspect: F)
    where
        F: Fn(&DeviceMessage) + Send + Sync + 'static,
    {
        *self.inspector.lock() = Some(Box::new(inspect));
    }

    pub(crate) fn inspections(&self) -> usize {
        self.inspections.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<(Topic, DeviceMessage)> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_on(&self, topic: Topic) -> Vec<DeviceMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// `(topic, cmd, channels)` for every published request, in order.
    pub(crate) fn commands(&self) -> Vec<(Topic, String, Option<String>)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(t, m)| {
                m.command
                    .clone()
                    .map(|cmd| (*t, cmd, m.channel_spec.clone()))
            })
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: Topic, payload: String) -> Result<usize, KioskError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KioskError::Channel(format!("no subscribers for topic {topic}")));
        }
        let message = DeviceMessage::decode(&payload)?;
        if let Some(inspect) = self.inspector.lock().as_ref() {
            inspect(&message);
            self.inspections.fetch_add(1, Ordering::SeqCst);
        }
        self.sent.lock().push((topic, message));
        Ok(1)
    }
}

/// The response a hopper would send to `probe` with the given note flags.
pub(crate) fn probe_response(probe: &DeviceMessage, note5: u8, note10: u8, note20: u8) -> DeviceMessage {
    let mut response = DeviceMessage::response_to(probe);
    response.note_5_ok = Some(note5);
    response.note_10_ok = Some(note10);
    response.note_20_ok = Some(note20);
    response
}
