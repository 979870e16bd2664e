//! The front panel seen by the customer.
//!
//! The panel renders whatever it is told; it holds no business logic.  The
//! control logic drives it through the [`Panel`] trait so that a console
//! renderer, a touch screen, or a recording test double can sit behind it.

/// What the panel should be telling the customer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hint {
    /// Devices are busy; nothing to do yet.
    PleaseWait,
    /// The note was refused or the session is ending.
    Sorry,
    /// Coins are on their way.
    Dispensing,
    /// The hopper cannot pay change for any accepted note.
    NoCoins,
    /// Idle prompt: insert a note.
    Default,
}

impl Hint {
    /// Short customer-facing text for this hint.
    pub fn text(&self) -> &'static str {
        match self {
            Hint::PleaseWait => "Please wait…",
            Hint::Sorry => "Sorry, this note cannot be changed right now",
            Hint::Dispensing => "Dispensing coins…",
            Hint::NoCoins => "Out of coins",
            Hint::Default => "Insert a note",
        }
    }
}

/// A front panel that reflects device state.
///
/// All methods take `&self`: the panel is shared between listener tasks and
/// implementations are expected to use interior mutability.
pub trait Panel: Send + Sync {
    /// Replace the current hint.
    fn hint(&self, hint: Hint);

    /// Mark a validator channel as inhibited (`true`) or accepted.
    fn update_inhibit(&self, channel: u8, inhibited: bool);

    /// Show the amount last emptied from the hopper, already formatted as a
    /// decimal currency value (e.g. `"12.50"`).
    fn update_emptied_amount(&self, amount: &str);

    /// Flush pending updates to the display.
    fn repaint(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockPanel {
        hint: Mutex<Option<Hint>>,
        repaints: Mutex<u32>,
    }

    impl Panel for MockPanel {
        fn hint(&self, hint: Hint) {
            *self.hint.lock().unwrap() = Some(hint);
        }
        fn update_inhibit(&self, _channel: u8, _inhibited: bool) {}
        fn update_emptied_amount(&self, _amount: &str) {}
        fn repaint(&self) {
            *self.repaints.lock().unwrap() += 1;
        }
    }

    #[test]
    fn panel_is_object_safe_and_shared() {
        let panel = MockPanel {
            hint: Mutex::new(None),
            repaints: Mutex::new(0),
        };
        let shared: &dyn Panel = &panel;
        shared.hint(Hint::NoCoins);
        shared.repaint();
        assert_eq!(*panel.hint.lock().unwrap(), Some(Hint::NoCoins));
        assert_eq!(*panel.repaints.lock().unwrap(), 1);
    }

    #[test]
    fn every_hint_has_text() {
        for hint in [
            Hint::PleaseWait,
            Hint::Sorry,
            Hint::Dispensing,
            Hint::NoCoins,
            Hint::Default,
        ] {
            assert!(!hint.text().is_empty());
        }
    }
}
