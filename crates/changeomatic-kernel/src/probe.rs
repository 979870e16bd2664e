//! [`CapabilityProbe`] – re-learns which notes the kiosk can pay change for.
//!
//! One probe cycle:
//!
//! 1. Publish `z-test-all-coin-channels` to the hopper, with its callback
//!    registered on the hopper dispatcher first.
//! 2. When the hopper answers, read the 5/10/20 note flags and classify
//!    validator channels 1/2/3 as "to enable" or "to disable", updating the
//!    panel's inhibit display for each.
//! 3. Publish one batched `disable-channels` and/or one `enable-channels` to
//!    the validator.  With nothing to enable the panel shows "no coins".
//!
//! Cycles are serialized.  A trigger that arrives while a cycle is in flight
//! is queued and starts once the running cycle completes or its request is
//! expired by the dispatcher, so enable/disable batches from two cycles never
//! interleave.
//!
//! The 50 note flag is decoded but deliberately unused: only three validator
//! channels are mapped.

use std::sync::Arc;

use changeomatic_hal::{Hint, Panel};
use changeomatic_middleware::{Publisher, Topic};
use changeomatic_types::{Denomination, DeviceMessage, KioskError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::callback::RequestCallback;
use crate::dispatcher::CorrelationDispatcher;
use crate::outbound::fire;

/// Validator channel → the note it accepts.
pub const PROBED_CHANNELS: [(u8, Denomination); 3] = [
    (1, Denomination::Note5),
    (2, Denomination::Note10),
    (3, Denomination::Note20),
];

/// Whether one validator channel may accept notes right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCapability {
    pub channel: u8,
    pub denomination: Denomination,
    pub accepted: bool,
}

/// The enable/disable decision derived from one probe response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbePlan {
    pub capabilities: Vec<ChannelCapability>,
    pub enable: Vec<u8>,
    pub disable: Vec<u8>,
}

impl ProbePlan {
    pub fn from_response(response: &DeviceMessage) -> Self {
        let mut plan = ProbePlan::default();
        for (channel, denomination) in PROBED_CHANNELS {
            let accepted = response.accepts(denomination);
            plan.capabilities.push(ChannelCapability {
                channel,
                denomination,
                accepted,
            });
            if accepted {
                plan.enable.push(channel);
            } else {
                plan.disable.push(channel);
            }
        }
        plan
    }
}

/// Comma-join channel numbers the way the validator expects them.
pub fn join_channels(channels: &[u8]) -> String {
    channels
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Result of asking for a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTrigger {
    /// A cycle started; its probe request carries this id.
    Started(String),
    /// A cycle is already running; this many cycles now wait behind it.
    Queued(usize),
}

#[derive(Default)]
struct ProbeState {
    in_flight: Option<String>,
    queued: usize,
    cycles_completed: u64,
}

struct ProbeInner {
    hopper: Arc<CorrelationDispatcher>,
    publisher: Arc<dyn Publisher>,
    panel: Arc<dyn Panel>,
    state: Mutex<ProbeState>,
}

/// Serialized "test all coin channels" workflow.  Clone it cheaply – all
/// clones share one in-flight slot and queue.
#[derive(Clone)]
pub struct CapabilityProbe {
    inner: Arc<ProbeInner>,
}

impl CapabilityProbe {
    pub fn new(
        hopper: Arc<CorrelationDispatcher>,
        publisher: Arc<dyn Publisher>,
        panel: Arc<dyn Panel>,
    ) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                hopper,
                publisher,
                panel,
                state: Mutex::new(ProbeState::default()),
            }),
        }
    }

    /// Start a probe cycle, or queue one behind the cycle in flight.
    ///
    /// # Errors
    ///
    /// Returns the publish error when the probe request could not be sent;
    /// the in-flight slot is released again.
    pub fn trigger(&self) -> Result<ProbeTrigger, KioskError> {
        let mut state = self.inner.state.lock();
        if let Some(running) = state.in_flight.clone() {
            state.queued += 1;
            debug!(in_flight = %running, queued = state.queued, "probe queued");
            return Ok(ProbeTrigger::Queued(state.queued));
        }
        self.inner.start(&mut state).map(ProbeTrigger::Started)
    }

    /// Correlation id of the probe currently awaiting an answer.
    pub fn in_flight(&self) -> Option<String> {
        self.inner.state.lock().in_flight.clone()
    }

    pub fn queued(&self) -> usize {
        self.inner.state.lock().queued
    }

    pub fn cycles_completed(&self) -> u64 {
        self.inner.state.lock().cycles_completed
    }
}

impl ProbeInner {
    /// Publish a probe request and mark it in flight.  Caller holds the lock.
    fn start(self: &Arc<Self>, state: &mut ProbeState) -> Result<String, KioskError> {
        let request = DeviceMessage::test_all_coin_channels();
        let id = request
            .message_id
            .clone()
            .ok_or(KioskError::MissingMessageId)?;

        let responder = Arc::clone(self);
        let response_id = id.clone();
        let expirer = Arc::clone(self);
        let expiry_id = id.clone();
        let callback = RequestCallback::for_request(&request, move |_, response| {
            responder.complete(&response_id, response);
            Ok(())
        })?
        .on_expired(move || expirer.release(&expiry_id));

        state.in_flight = Some(id.clone());
        if let Err(e) = self.hopper.submit(
            self.publisher.as_ref(),
            Topic::HopperRequest,
            &request,
            callback,
        ) {
            state.in_flight = None;
            warn!(error = %e, "probe request not sent");
            return Err(e);
        }
        info!(correlation_id = %id, "publishing test for all amounts");
        Ok(id)
    }

    /// Start queued cycles until one is in flight or the queue is empty.
    fn start_queued(self: &Arc<Self>, state: &mut ProbeState) {
        while state.in_flight.is_none() && state.queued > 0 {
            state.queued -= 1;
            // start() already logged the failure; move on to the next one.
            let _ = self.start(state);
        }
    }

    fn complete(self: &Arc<Self>, id: &str, response: &DeviceMessage) {
        let mut state = self.state.lock();
        if state.in_flight.as_deref() != Some(id) {
            warn!(correlation_id = %id, "ignoring probe response for a released cycle");
            return;
        }
        if let Some(error) = &response.error_text {
            warn!(correlation_id = %id, error = %error, "hopper reported an error to the probe");
        }

        let plan = ProbePlan::from_response(response);
        self.apply(&plan);

        state.in_flight = None;
        state.cycles_completed += 1;
        info!(
            correlation_id = %id,
            enable = %join_channels(&plan.enable),
            disable = %join_channels(&plan.disable),
            "probe cycle complete"
        );
        self.start_queued(&mut state);
    }

    fn release(self: &Arc<Self>, id: &str) {
        let mut state = self.state.lock();
        if state.in_flight.as_deref() != Some(id) {
            return;
        }
        warn!(correlation_id = %id, "hopper never answered the probe; releasing");
        state.in_flight = None;
        self.start_queued(&mut state);
    }

    fn apply(&self, plan: &ProbePlan) {
        for capability in &plan.capabilities {
            self.panel
                .update_inhibit(capability.channel, !capability.accepted);
        }

        let publisher = self.publisher.as_ref();
        if !plan.disable.is_empty() {
            let request = DeviceMessage::disable_channels(join_channels(&plan.disable));
            fire(publisher, Topic::ValidatorRequest, &request);
        }
        if !plan.enable.is_empty() {
            let request = DeviceMessage::enable_channels(join_channels(&plan.enable));
            fire(publisher, Topic::ValidatorRequest, &request);
        } else {
            self.panel.hint(Hint::NoCoins);
        }
        self.panel.repaint();
    }
}
