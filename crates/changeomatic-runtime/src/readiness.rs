//! One-shot handshake between the front panel and the kiosk.
//!
//! The kiosk must not drive the panel before it exists.  The panel side holds
//! a [`ReadySignal`] and fires it once it has rendered; the kiosk awaits the
//! matching [`ReadyWait`] during startup.

use std::time::Duration;

use changeomatic_types::KioskError;
use tokio::sync::oneshot;

/// Held by the panel; consumed when the panel is up.
#[derive(Debug)]
pub struct ReadySignal(oneshot::Sender<()>);

/// Held by the kiosk; resolves once the panel is up.
#[derive(Debug)]
pub struct ReadyWait(oneshot::Receiver<()>);

/// Create a linked signal/wait pair.
pub fn panel_readiness() -> (ReadySignal, ReadyWait) {
    let (tx, rx) = oneshot::channel();
    (ReadySignal(tx), ReadyWait(rx))
}

impl ReadySignal {
    /// Announce that the panel is ready.  Firing after the waiter is gone is
    /// harmless.
    pub fn ready(self) {
        let _ = self.0.send(());
    }
}

impl ReadyWait {
    /// Wait for the panel.
    ///
    /// # Errors
    ///
    /// [`KioskError::PanelUnavailable`] if the signal is dropped unfired.
    pub async fn wait(self) -> Result<(), KioskError> {
        self.0.await.map_err(|_| KioskError::PanelUnavailable)
    }

    /// [`wait`](Self::wait), giving up after `limit`.
    pub async fn wait_timeout(self, limit: Duration) -> Result<(), KioskError> {
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(KioskError::PanelUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fired_signal_releases_waiter() {
        let (signal, wait) = panel_readiness();
        signal.ready();
        assert_eq!(wait.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn signal_from_another_task() {
        let (signal, wait) = panel_readiness();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            signal.ready();
        });
        assert_eq!(wait.wait_timeout(Duration::from_secs(2)).await, Ok(()));
    }

    #[tokio::test]
    async fn dropped_signal_is_an_error() {
        let (signal, wait) = panel_readiness();
        drop(signal);
        assert_eq!(wait.wait().await, Err(KioskError::PanelUnavailable));
    }

    #[tokio::test]
    async fn silent_panel_times_out() {
        let (_signal, wait) = panel_readiness();
        assert_eq!(
            wait.wait_timeout(Duration::from_millis(20)).await,
            Err(KioskError::PanelUnavailable)
        );
    }
}
