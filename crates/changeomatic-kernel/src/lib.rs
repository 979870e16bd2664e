//! `changeomatic-kernel` – the kiosk's control logic.
//!
//! Everything here is synchronous and bus-agnostic: components publish
//! through the [`Publisher`][changeomatic_middleware::Publisher] seam and are
//! fed by [`MessageListener`][changeomatic_middleware::MessageListener] tasks
//! that the runtime spawns.
//!
//! # Modules
//!
//! - [`callback`] – [`RequestCallback`][callback::RequestCallback]: a
//!   one-shot handler bound to the `msgId` of the request it answers.
//! - [`dispatcher`] – [`CorrelationDispatcher`][dispatcher::CorrelationDispatcher]:
//!   the per-direction registry of pending requests.  Matches each response
//!   to its callback by `correlId`, removing it atomically, and expires
//!   requests that are never answered.
//! - [`probe`] – [`CapabilityProbe`][probe::CapabilityProbe]: the serialized
//!   "test all coin channels" cycle that decides which validator channels may
//!   accept notes.
//! - [`router`] – [`EventRouter`][router::EventRouter]: the rule table that
//!   reacts to unsolicited hopper, validator and payout events.
//! - [`outbound`] – fire-and-forget request publishing.

pub mod callback;
pub mod dispatcher;
pub mod outbound;
pub mod probe;
pub mod router;

#[cfg(test)]
mod test_support;

pub use callback::RequestCallback;
pub use dispatcher::{CorrelationDispatcher, DispatchOutcome, DispatcherStats};
pub use probe::{CapabilityProbe, ChannelCapability, PROBED_CHANNELS, ProbePlan, ProbeTrigger};
pub use router::{Action, EventRouter, format_minor_units, plan};
