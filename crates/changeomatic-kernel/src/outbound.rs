//! Fire-and-forget publishing of device requests.

use changeomatic_middleware::{Publisher, Topic};
use changeomatic_types::DeviceMessage;
use tracing::{info, warn};

/// Encode and publish `message` on `topic`.
///
/// Failures are logged and swallowed: a request nobody receives simply has no
/// effect.  Returns whether the request reached at least the bus.
pub fn fire(publisher: &dyn Publisher, topic: Topic, message: &DeviceMessage) -> bool {
    let payload = match message.encode() {
        Ok(p) => p,
        Err(e) => {
            warn!(%topic, error = %e, "could not encode request");
            return false;
        }
    };
    info!(%topic, payload = %payload, "publishing");
    match publisher.publish(topic, payload) {
        Ok(_) => true,
        Err(e) => {
            warn!(%topic, command = ?message.command, error = %e, "request went nowhere");
            false
        }
    }
}
