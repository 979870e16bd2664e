//! Terminal rendition of the kiosk's front panel.

use std::collections::BTreeMap;

use changeomatic_hal::{Hint, Panel};
use colored::Colorize;
use parking_lot::Mutex;

struct PanelState {
    hint: Hint,
    inhibited: BTreeMap<u8, bool>,
    emptied: Option<String>,
}

/// A [`Panel`] that redraws a small status block on stdout at every
/// repaint.
pub struct ConsolePanel {
    state: Mutex<PanelState>,
}

impl ConsolePanel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PanelState {
                hint: Hint::Default,
                inhibited: BTreeMap::new(),
                emptied: None,
            }),
        }
    }

    /// The block [`Panel::repaint`] prints.
    pub fn render(&self) -> String {
        let state = self.state.lock();
        let hint = match state.hint {
            Hint::Default => state.hint.text().bold().green(),
            Hint::PleaseWait | Hint::Dispensing => state.hint.text().bold().yellow(),
            Hint::Sorry | Hint::NoCoins => state.hint.text().bold().red(),
        };

        let mut out = String::new();
        out.push_str(&format!("  ┌ {}\n", "change-o-matic".bold().cyan()));
        out.push_str(&format!("  │ {hint}\n"));
        if !state.inhibited.is_empty() {
            let channels: Vec<String> = state
                .inhibited
                .iter()
                .map(|(channel, inhibited)| {
                    if *inhibited {
                        format!("{channel}:{}", "off".red())
                    } else {
                        format!("{channel}:{}", "on".green())
                    }
                })
                .collect();
            out.push_str(&format!("  │ channels {}\n", channels.join(" ")));
        }
        if let Some(amount) = &state.emptied {
            out.push_str(&format!("  │ emptied  {}\n", amount.dimmed()));
        }
        out.push_str("  └");
        out
    }
}

impl Default for ConsolePanel {
    fn default() -> Self {
        Self::new()
    }
}

impl Panel for ConsolePanel {
    fn hint(&self, hint: Hint) {
        self.state.lock().hint = hint;
    }

    fn update_inhibit(&self, channel: u8, inhibited: bool) {
        self.state.lock().inhibited.insert(channel, inhibited);
    }

    fn update_emptied_amount(&self, amount: &str) {
        self.state.lock().emptied = Some(amount.to_string());
    }

    fn repaint(&self) {
        println!("{}", self.render());
    }
}
