//! `changeomatic-hal` – the kiosk's physical surfaces.
//!
//! - [`panel`] – the [`Panel`] trait the control logic drives and the
//!   [`Hint`] vocabulary it speaks.
//! - [`sim`] – in-process hopper, validator, and panel stand-ins so the whole
//!   stack can run without hardware.

pub mod panel;
pub mod sim;

pub use panel::{Hint, Panel};
