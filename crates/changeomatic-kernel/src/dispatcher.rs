//! [`CorrelationDispatcher`] – routes device responses to the callback that
//! is waiting for them.
//!
//! Flow:
//! 1. A component builds a request and a [`RequestCallback`] bound to the
//!    request's `msgId`.
//! 2. [`CorrelationDispatcher::submit`] registers the callback, then
//!    publishes the request.  Registration always happens first so a fast
//!    response can never beat its handler into the registry.
//! 3. The response listener feeds every raw payload to
//!    [`CorrelationDispatcher::on_incoming`], which removes the callback for
//!    the payload's `correlId` in one atomic step and runs it.
//! 4. A sweeper calls [`CorrelationDispatcher::remove_expired`] so that
//!    requests the device never answers do not pile up forever.
//!
//! Every delivery ends in a [`DispatchOutcome`]; nothing here returns an
//! error to the listener that fed it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use changeomatic_middleware::{MessageListener, Publisher, Topic};
use changeomatic_types::{DeviceMessage, KioskError};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::callback::RequestCallback;

/// What happened to one incoming payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A pending callback was found and completed.
    Delivered,
    /// No callback waits for this `correlId` (or there is none).
    Unmatched,
    /// The payload did not decode.
    Malformed,
    /// A callback was found but returned an error or panicked.
    HandlerFailed,
}

struct PendingRequest {
    callback: RequestCallback,
    registered_at: Instant,
}

/// Counters for one dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub registered: AtomicU64,
    pub delivered: AtomicU64,
    pub unmatched: AtomicU64,
    pub malformed: AtomicU64,
    pub failed: AtomicU64,
    pub expired: AtomicU64,
}

/// Registry of pending requests for one request direction (hopper or
/// validator).
pub struct CorrelationDispatcher {
    name: String,
    pending: DashMap<String, PendingRequest>,
    retention: Option<Duration>,
    stats: DispatcherStats,
}

impl CorrelationDispatcher {
    /// Create a dispatcher that keeps unanswered requests forever.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: DashMap::new(),
            retention: None,
            stats: DispatcherStats::default(),
        }
    }

    /// Expire requests that stay unanswered for longer than `ttl`
    /// (builder-style).
    pub fn with_retention(mut self, ttl: Duration) -> Self {
        self.retention = Some(ttl);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// Store `callback` under its correlation id.
    ///
    /// A callback already registered under the same id is replaced and
    /// dropped without running.
    pub fn register(&self, callback: RequestCallback) {
        let id = callback.correlation_id().to_string();
        let previous = self.pending.insert(
            id.clone(),
            PendingRequest {
                callback,
                registered_at: Instant::now(),
            },
        );
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            warn!(dispatcher = %self.name, correlation_id = %id, "replaced pending callback");
        } else {
            debug!(dispatcher = %self.name, correlation_id = %id, "registered pending callback");
        }
    }

    /// Register `callback`, then publish `request` on `topic`.
    ///
    /// # Errors
    ///
    /// * [`KioskError::CorrelationMismatch`] when `callback` is not bound to
    ///   the request's `msgId`.
    /// * [`KioskError::Encode`] when the request cannot be encoded; nothing is
    ///   registered.
    /// * Whatever the publisher returns; the registration is withdrawn since
    ///   no response can arrive for a request nobody received.
    pub fn submit(
        &self,
        publisher: &dyn Publisher,
        topic: Topic,
        request: &DeviceMessage,
        callback: RequestCallback,
    ) -> Result<(), KioskError> {
        if request.message_id.as_deref() != Some(callback.correlation_id()) {
            return Err(KioskError::CorrelationMismatch {
                expected: callback.correlation_id().to_string(),
                actual: request.message_id.clone(),
            });
        }
        let payload = request.encode()?;
        let id = callback.correlation_id().to_string();

        self.register(callback);
        match publisher.publish(topic, payload) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.pending.remove(&id);
                warn!(dispatcher = %self.name, correlation_id = %id, error = %e, "request not published; callback withdrawn");
                Err(e)
            }
        }
    }

    /// Decode `raw` and hand it to the matching callback, if any.
    pub fn on_incoming(&self, topic: Topic, raw: &str) -> DispatchOutcome {
        info!(dispatcher = %self.name, %topic, payload = raw, "received response");
        match DeviceMessage::decode(raw) {
            Ok(message) => self.dispatch(topic, &message),
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(dispatcher = %self.name, %topic, error = %e, "discarding malformed message");
                DispatchOutcome::Malformed
            }
        }
    }

    /// Hand an already decoded message to the matching callback, if any.
    ///
    /// Removal and lookup are one atomic step: of two concurrent deliveries
    /// for the same id at most one finds the callback.
    pub fn dispatch(&self, topic: Topic, message: &DeviceMessage) -> DispatchOutcome {
        let pending = message
            .correlation_id
            .as_deref()
            .and_then(|id| self.pending.remove(id))
            .map(|(_, pending)| pending);

        let Some(pending) = pending else {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(
                dispatcher = %self.name,
                correlation_id = ?message.correlation_id,
                "no pending callback"
            );
            return DispatchOutcome::Unmatched;
        };

        let waited = pending.registered_at.elapsed();
        let id = pending.callback.correlation_id().to_string();
        let result = catch_unwind(AssertUnwindSafe(|| {
            pending.callback.on_response(topic, message)
        }));

        match result {
            Ok(Ok(())) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    dispatcher = %self.name,
                    correlation_id = %id,
                    waited_ms = waited.as_millis(),
                    "callback completed"
                );
                DispatchOutcome::Delivered
            }
            Ok(Err(e)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(dispatcher = %self.name, correlation_id = %id, error = %e, "callback failed");
                DispatchOutcome::HandlerFailed
            }
            Err(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(dispatcher = %self.name, correlation_id = %id, "callback panicked");
                DispatchOutcome::HandlerFailed
            }
        }
    }

    /// Drop every request older than the retention period and run its expiry
    /// hook.  Returns the number of requests removed.
    ///
    /// Hooks run after the entry has left the registry, so they may register
    /// new callbacks on this dispatcher.
    pub fn remove_expired(&self) -> usize {
        let Some(ttl) = self.retention else {
            return 0;
        };

        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.registered_at.elapsed() > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in stale {
            let Some((_, pending)) = self
                .pending
                .remove_if(&id, |_, p| p.registered_at.elapsed() > ttl)
            else {
                continue;
            };
            removed += 1;
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            warn!(
                dispatcher = %self.name,
                correlation_id = %id,
                elapsed_ms = pending.registered_at.elapsed().as_millis(),
                timeout_ms = ttl.as_millis(),
                "expiring unanswered request"
            );
            pending.callback.expire();
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}

impl MessageListener for CorrelationDispatcher {
    fn on_message(&self, topic: Topic, payload: &str) {
        self.on_incoming(topic, payload);
    }
}
