//! In-process simulated devices for headless runs and tests.
//!
//! [`SimHopper`] and [`SimValidator`] attach to an [`EventBus`] exactly like
//! the real device drivers would: they listen on their request topic, answer
//! on their response topic with the request's `msgId` as `correlId`, and
//! publish unsolicited events on their event topic.  [`SimPanel`] records
//! every call the control logic makes on the front panel.
//!
//! # Example
//!
//! ```rust,no_run
//! use changeomatic_hal::sim::{NoteFloat, SimHopper};
//! use changeomatic_middleware::EventBus;
//!
//! # #[tokio::main] async fn main() {
//! let bus = EventBus::default();
//! let hopper = SimHopper::attach(&bus, NoteFloat::default());
//! hopper.set_float(NoteFloat { note_20: false, ..NoteFloat::default() });
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use changeomatic_middleware::{EventBus, MessageListener, Topic, spawn_listener};
use changeomatic_types::{DeviceCommand, DeviceMessage, Denomination};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::panel::{Hint, Panel};

// ────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ────────────────────────────────────────────────────────────────────────────

fn publish(bus: &EventBus, topic: Topic, message: &DeviceMessage) {
    match message.encode() {
        Ok(payload) => {
            if let Err(e) = bus.publish_to(topic, payload) {
                debug!(%topic, error = %e, "sim device publish went nowhere");
            }
        }
        Err(e) => warn!(%topic, error = %e, "sim device could not encode message"),
    }
}

fn acknowledge(bus: &EventBus, topic: Topic, request: &DeviceMessage) {
    let mut response = DeviceMessage::response_to(request);
    response.result_text = Some("ok".to_string());
    publish(bus, topic, &response);
}

fn reject(bus: &EventBus, topic: Topic, request: &DeviceMessage, reason: &str) {
    let mut response = DeviceMessage::response_to(request);
    response.error_text = Some(reason.to_string());
    publish(bus, topic, &response);
}

/// Parse a comma-joined channel list, skipping anything that is not a number.
pub fn parse_channel_spec(spec: &str) -> Vec<u8> {
    spec.split(',')
        .filter_map(|part| part.trim().parse::<u8>().ok())
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Hopper
// ────────────────────────────────────────────────────────────────────────────

/// Which note values the simulated hopper currently holds enough coins for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteFloat {
    pub note_5: bool,
    pub note_10: bool,
    pub note_20: bool,
    pub note_50: bool,
}

impl Default for NoteFloat {
    fn default() -> Self {
        Self {
            note_5: true,
            note_10: true,
            note_20: true,
            note_50: true,
        }
    }
}

impl NoteFloat {
    /// A hopper with no coins at all.
    pub fn empty() -> Self {
        Self {
            note_5: false,
            note_10: false,
            note_20: false,
            note_50: false,
        }
    }

    fn apply_to(&self, message: &mut DeviceMessage) {
        message.set_accepts(Denomination::Note5, self.note_5);
        message.set_accepts(Denomination::Note10, self.note_10);
        message.set_accepts(Denomination::Note20, self.note_20);
        message.set_accepts(Denomination::Note50, self.note_50);
    }
}

struct HopperState {
    float: NoteFloat,
    enabled: bool,
    received: Vec<DeviceMessage>,
}

struct HopperListener {
    bus: EventBus,
    state: Arc<Mutex<HopperState>>,
}

impl MessageListener for HopperListener {
    fn on_message(&self, _topic: Topic, payload: &str) {
        let request = match DeviceMessage::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "sim hopper dropped malformed request");
                return;
            }
        };
        let float = {
            let mut state = self.state.lock();
            state.received.push(request.clone());
            match request.device_command() {
                Some(DeviceCommand::Enable) => state.enabled = true,
                Some(DeviceCommand::Disable) => state.enabled = false,
                _ => {}
            }
            state.float
        };

        match request.device_command() {
            Some(DeviceCommand::TestAllCoinChannels) => {
                let mut response = DeviceMessage::response_to(&request);
                float.apply_to(&mut response);
                publish(&self.bus, Topic::HopperResponse, &response);
            }
            Some(DeviceCommand::DoPayout) => {
                let mut dispensing = DeviceMessage::event("dispensing");
                dispensing.amount = request.amount;
                publish(&self.bus, Topic::HopperEvent, &dispensing);
                acknowledge(&self.bus, Topic::HopperResponse, &request);
                let mut dispensed = DeviceMessage::event("dispensed");
                dispensed.amount = request.amount;
                publish(&self.bus, Topic::HopperEvent, &dispensed);
            }
            Some(DeviceCommand::Enable) | Some(DeviceCommand::Disable) => {
                acknowledge(&self.bus, Topic::HopperResponse, &request);
            }
            _ => reject(&self.bus, Topic::HopperResponse, &request, "unknown command"),
        }
    }
}

/// Simulated coin hopper.
///
/// A payout is reported as `dispensing`, the acknowledgement, then
/// `dispensed`.  The kiosk reacts only to `dispensing`.
pub struct SimHopper {
    bus: EventBus,
    state: Arc<Mutex<HopperState>>,
    task: JoinHandle<()>,
}

impl SimHopper {
    /// Start answering `hopper-request` traffic on `bus`.
    pub fn attach(bus: &EventBus, float: NoteFloat) -> Self {
        let state = Arc::new(Mutex::new(HopperState {
            float,
            enabled: true,
            received: Vec::new(),
        }));
        let listener = HopperListener {
            bus: bus.clone(),
            state: Arc::clone(&state),
        };
        let task = spawn_listener(bus, Topic::HopperRequest, Arc::new(listener));
        Self {
            bus: bus.clone(),
            state,
            task,
        }
    }

    /// Change what the next probe will report.
    pub fn set_float(&self, float: NoteFloat) {
        self.state.lock().float = float;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Every request the hopper has seen, in arrival order.
    pub fn received(&self) -> Vec<DeviceMessage> {
        self.state.lock().received.clone()
    }

    /// Publish an unsolicited hopper event such as `"floated"`.
    pub fn emit(&self, event: &str, amount: Option<i64>) {
        let mut message = DeviceMessage::event(event);
        message.amount = amount;
        publish(&self.bus, Topic::HopperEvent, &message);
    }
}

impl Drop for SimHopper {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validator
// ────────────────────────────────────────────────────────────────────────────

struct ValidatorState {
    accepting: BTreeSet<u8>,
    enabled: bool,
    received: Vec<DeviceMessage>,
}

struct ValidatorListener {
    bus: EventBus,
    state: Arc<Mutex<ValidatorState>>,
}

impl MessageListener for ValidatorListener {
    fn on_message(&self, _topic: Topic, payload: &str) {
        let request = match DeviceMessage::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "sim validator dropped malformed request");
                return;
            }
        };
        let channels = request
            .channel_spec
            .as_deref()
            .map(parse_channel_spec)
            .unwrap_or_default();

        let known = {
            let mut state = self.state.lock();
            state.received.push(request.clone());
            match request.device_command() {
                // Enabling channels re-arms a validator disabled after a credit.
                Some(DeviceCommand::EnableChannels) => {
                    state.accepting.extend(channels);
                    state.enabled = true;
                    true
                }
                Some(DeviceCommand::DisableChannels) => {
                    for channel in channels {
                        state.accepting.remove(&channel);
                    }
                    true
                }
                Some(DeviceCommand::Enable) => {
                    state.enabled = true;
                    true
                }
                Some(DeviceCommand::Disable) => {
                    state.enabled = false;
                    true
                }
                _ => false,
            }
        };

        if known {
            acknowledge(&self.bus, Topic::ValidatorResponse, &request);
        } else {
            reject(&self.bus, Topic::ValidatorResponse, &request, "unknown command");
        }
    }
}

/// Validator channel for a note worth `amount` minor units.
pub fn channel_for_amount(amount: i64) -> Option<u8> {
    match amount {
        500 => Some(1),
        1000 => Some(2),
        2000 => Some(3),
        5000 => Some(4),
        _ => None,
    }
}

/// Simulated banknote validator.
///
/// Starts enabled with every channel inhibited, so no note is credited until
/// the kiosk's first capability check enables some channels.
pub struct SimValidator {
    bus: EventBus,
    state: Arc<Mutex<ValidatorState>>,
    task: JoinHandle<()>,
}

impl SimValidator {
    /// Start answering `validator-request` traffic on `bus`.
    pub fn attach(bus: &EventBus) -> Self {
        let state = Arc::new(Mutex::new(ValidatorState {
            accepting: BTreeSet::new(),
            enabled: true,
            received: Vec::new(),
        }));
        let listener = ValidatorListener {
            bus: bus.clone(),
            state: Arc::clone(&state),
        };
        let task = spawn_listener(bus, Topic::ValidatorRequest, Arc::new(listener));
        Self {
            bus: bus.clone(),
            state,
            task,
        }
    }

    /// Channels currently accepting notes, ascending.
    pub fn accepting(&self) -> Vec<u8> {
        self.state.lock().accepting.iter().copied().collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Every request the validator has seen, in arrival order.
    pub fn received(&self) -> Vec<DeviceMessage> {
        self.state.lock().received.clone()
    }

    /// Simulate a customer inserting a note worth `amount` minor units.
    ///
    /// The note is read and credited only while the validator is enabled and
    /// the note's channel accepts; otherwise it is rejected.  Returns whether
    /// it was credited.
    pub fn insert_note(&self, amount: i64) -> bool {
        let accepted = {
            let state = self.state.lock();
            state.enabled
                && channel_for_amount(amount).is_some_and(|ch| state.accepting.contains(&ch))
        };
        if !accepted {
            self.reject_note();
            return false;
        }
        self.emit("reading", None);
        self.emit("read", None);
        self.emit("credit", Some(amount));
        true
    }

    /// Simulate a note the validator refuses.
    pub fn reject_note(&self) {
        self.emit("reading", None);
        self.emit("rejecting", None);
        self.emit("rejected", None);
    }

    /// Publish an unsolicited validator event.
    pub fn emit(&self, event: &str, amount: Option<i64>) {
        let mut message = DeviceMessage::event(event);
        message.amount = amount;
        publish(&self.bus, Topic::ValidatorEvent, &message);
    }
}

impl Drop for SimValidator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Panel
// ────────────────────────────────────────────────────────────────────────────

/// A single call made on a [`SimPanel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCall {
    Hint(Hint),
    Inhibit { channel: u8, inhibited: bool },
    EmptiedAmount(String),
    Repaint,
}

/// A panel that renders nothing and remembers everything.
#[derive(Default)]
pub struct SimPanel {
    calls: Mutex<Vec<PanelCall>>,
}

impl SimPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls so far, oldest first.
    pub fn calls(&self) -> Vec<PanelCall> {
        self.calls.lock().clone()
    }

    /// Only the hints, oldest first.
    pub fn hints(&self) -> Vec<Hint> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PanelCall::Hint(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    pub fn count_hint(&self, hint: Hint) -> usize {
        self.hints().iter().filter(|h| **h == hint).count()
    }

    /// Latest inhibit state per channel, if the channel was ever updated.
    pub fn inhibited(&self, channel: u8) -> Option<bool> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            PanelCall::Inhibit {
                channel: ch,
                inhibited,
            } if *ch == channel => Some(*inhibited),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl Panel for SimPanel {
    fn hint(&self, hint: Hint) {
        self.calls.lock().push(PanelCall::Hint(hint));
    }

    fn update_inhibit(&self, channel: u8, inhibited: bool) {
        self.calls.lock().push(PanelCall::Inhibit { channel, inhibited });
    }

    fn update_emptied_amount(&self, amount: &str) {
        self.calls
            .lock()
            .push(PanelCall::EmptiedAmount(amount.to_string()));
    }

    fn repaint(&self) {
        self.calls.lock().push(PanelCall::Repaint);
    }
}
