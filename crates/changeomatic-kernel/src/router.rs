//! [`EventRouter`] – turns unsolicited device events into requests and panel
//! updates.
//!
//! Routing is split in two: [`plan`] is a pure function from one event to an
//! ordered list of [`Action`]s, and [`EventRouter::execute`] carries them out.
//! The router keeps no state of its own.

use std::sync::Arc;

use changeomatic_hal::{Hint, Panel};
use changeomatic_middleware::{MessageListener, Publisher, Topic};
use changeomatic_types::DeviceMessage;
use tracing::{debug, info, warn};

use crate::outbound::fire;
use crate::probe::CapabilityProbe;

/// One step the router takes in reaction to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Publish `request` on `topic`.
    Publish { topic: Topic, request: DeviceMessage },
    Hint(Hint),
    /// Show this already formatted emptied amount.
    UpdateEmptied(String),
    Repaint,
    /// Trigger a capability probe cycle.
    RunProbe,
}

/// Render minor units as a plain decimal with two places: `1234` → `"12.34"`.
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Decide what to do about `message`, received on `topic`.
///
/// Unknown topics and events yield an empty plan.
pub fn plan(topic: Topic, message: &DeviceMessage) -> Vec<Action> {
    let Some(event) = message.event_name() else {
        return Vec::new();
    };

    match (topic, event.as_str()) {
        (Topic::PayoutEvent, "started") => vec![Action::RunProbe],
        (Topic::PayoutEvent, "exiting") => vec![Action::Hint(Hint::Sorry), Action::Repaint],

        (Topic::ValidatorEvent, "credit") => {
            let mut actions = vec![
                Action::Publish {
                    topic: Topic::ValidatorRequest,
                    request: DeviceMessage::inhibit_all_channels(),
                },
                Action::Publish {
                    topic: Topic::ValidatorRequest,
                    request: DeviceMessage::disable(),
                },
            ];
            match message.amount {
                Some(amount) => actions.push(Action::Publish {
                    topic: Topic::HopperRequest,
                    request: DeviceMessage::do_payout(amount),
                }),
                None => warn!("credit event without amount; validator stopped, nothing paid out"),
            }
            actions
        }
        (Topic::ValidatorEvent, "read") => Vec::new(),
        (Topic::ValidatorEvent, "reading") => {
            vec![Action::Hint(Hint::PleaseWait), Action::Repaint]
        }
        (Topic::ValidatorEvent, "rejecting") => vec![Action::Hint(Hint::Sorry), Action::Repaint],
        (Topic::ValidatorEvent, "rejected") => vec![Action::Hint(Hint::Default), Action::Repaint],

        (Topic::HopperEvent, "disabled") => vec![Action::Publish {
            topic: Topic::HopperRequest,
            request: DeviceMessage::enable(),
        }],
        (Topic::HopperEvent, "dispensing") => {
            vec![Action::Hint(Hint::Dispensing), Action::Repaint]
        }
        (Topic::HopperEvent, "smart-emptied" | "smart-emptying") => message
            .amount
            .map(|amount| vec![Action::UpdateEmptied(format_minor_units(amount))])
            .unwrap_or_default(),
        (Topic::HopperEvent, "floated" | "cashbox-paid") => vec![
            Action::Hint(Hint::PleaseWait),
            Action::Repaint,
            Action::RunProbe,
        ],
        (Topic::HopperEvent, "coin-credit") => vec![Action::RunProbe],

        _ => Vec::new(),
    }
}

/// Executes routing plans against the bus, the panel and the probe.
pub struct EventRouter {
    publisher: Arc<dyn Publisher>,
    panel: Arc<dyn Panel>,
    probe: CapabilityProbe,
}

impl EventRouter {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        panel: Arc<dyn Panel>,
        probe: CapabilityProbe,
    ) -> Self {
        Self {
            publisher,
            panel,
            probe,
        }
    }

    /// Decode `raw` and route it.  Malformed payloads are logged and dropped.
    pub fn on_incoming(&self, topic: Topic, raw: &str) {
        info!(%topic, payload = raw, "received event");
        match DeviceMessage::decode(raw) {
            Ok(message) => {
                self.route(topic, &message);
            }
            Err(e) => warn!(%topic, error = %e, "discarding malformed event"),
        }
    }

    /// Plan and execute the reaction to `message`.  Returns the plan.
    pub fn route(&self, topic: Topic, message: &DeviceMessage) -> Vec<Action> {
        let actions = plan(topic, message);
        if actions.is_empty() {
            debug!(%topic, event = ?message.event, "no action for event");
        }
        for action in &actions {
            self.execute(action);
        }
        actions
    }

    pub fn execute(&self, action: &Action) {
        match action {
            Action::Publish { topic, request } => {
                fire(self.publisher.as_ref(), *topic, request);
            }
            Action::Hint(hint) => self.panel.hint(*hint),
            Action::UpdateEmptied(text) => self.panel.update_emptied_amount(text),
            Action::Repaint => self.panel.repaint(),
            Action::RunProbe => {
                if let Err(e) = self.probe.trigger() {
                    warn!(error = %e, "could not start capability probe");
                }
            }
        }
    }
}

impl MessageListener for EventRouter {
    fn on_message(&self, topic: Topic, payload: &str) {
        self.on_incoming(topic, payload);
    }
}
