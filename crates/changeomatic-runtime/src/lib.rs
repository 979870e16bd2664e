//! `changeomatic-runtime` – runs the kiosk.
//!
//! # Modules
//!
//! - [`kiosk`] – [`Kiosk`][kiosk::Kiosk]: attaches the dispatchers and the
//!   event router to the bus, performs the startup handshake with the panel,
//!   runs the first capability probe and sweeps unanswered requests.
//! - [`readiness`] – [`panel_readiness`][readiness::panel_readiness]: the
//!   one-shot signal the panel fires once it can be drawn on.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, optionally exporting spans over OTLP when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod kiosk;
pub mod readiness;
pub mod telemetry;

pub use kiosk::{Kiosk, KioskConfig};
pub use readiness::{ReadySignal, ReadyWait, panel_readiness};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
