//! `changeomatic-middleware` – the message plumbing.
//!
//! Routes JSON payloads between the kiosk control logic and the hopper /
//! validator drivers without caring about the payloads' meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe bus built on Tokio broadcast
//!   channels, plus the [`Publisher`] seam the control logic publishes
//!   through.
//! - [`listener`] – [`MessageListener`] and [`spawn_listener`], which push
//!   every payload on a topic into a consumer from its own task.

pub mod bus;
pub mod listener;

pub use bus::{EventBus, Publisher, Topic, TopicReceiver};
pub use listener::{MessageListener, spawn_listener};
