//! [`RequestCallback`] – a one-shot response handler bound to one request.
//!
//! The callback is created from the request it answers, before that request
//! is published, and remembers the request's `msgId` as the correlation id it
//! expects.  It is consumed by value when it fires, so it can never run twice.

use changeomatic_middleware::Topic;
use changeomatic_types::{DeviceMessage, KioskError};

/// Boxed response handler.
pub type ResponseHandler =
    Box<dyn FnOnce(Topic, &DeviceMessage) -> Result<(), KioskError> + Send + Sync + 'static>;

/// Boxed hook run when a pending callback is dropped unanswered.
pub type ExpiryHook = Box<dyn FnOnce() + Send + Sync + 'static>;

/// One-shot handler for the response to a single request.
pub struct RequestCallback {
    correlation_id: String,
    handler: ResponseHandler,
    on_expired: Option<ExpiryHook>,
}

impl RequestCallback {
    /// Bind `handler` to `correlation_id`.
    pub fn new<F>(correlation_id: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce(Topic, &DeviceMessage) -> Result<(), KioskError> + Send + Sync + 'static,
    {
        Self {
            correlation_id: correlation_id.into(),
            handler: Box::new(handler),
            on_expired: None,
        }
    }

    /// Bind `handler` to the `msgId` of `request`.
    ///
    /// # Errors
    ///
    /// Returns [`KioskError::MissingMessageId`] when the request has no id to
    /// correlate on.
    pub fn for_request<F>(request: &DeviceMessage, handler: F) -> Result<Self, KioskError>
    where
        F: FnOnce(Topic, &DeviceMessage) -> Result<(), KioskError> + Send + Sync + 'static,
    {
        let id = request
            .message_id
            .as_deref()
            .ok_or(KioskError::MissingMessageId)?;
        Ok(Self::new(id, handler))
    }

    /// Attach a hook that runs if the callback is expired by the dispatcher's
    /// retention policy instead of being answered.
    pub fn on_expired<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.on_expired = Some(Box::new(hook));
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Whether `message` answers the request this callback is bound to.
    pub fn matches(&self, message: &DeviceMessage) -> bool {
        message.correlation_id.as_deref() == Some(self.correlation_id.as_str())
    }

    /// Run the handler with `message`.
    ///
    /// # Errors
    ///
    /// Returns [`KioskError::CorrelationMismatch`] without running the handler
    /// when `message` answers a different request; otherwise whatever the
    /// handler returns.
    pub fn on_response(self, topic: Topic, message: &DeviceMessage) -> Result<(), KioskError> {
        if !self.matches(message) {
            return Err(KioskError::CorrelationMismatch {
                expected: self.correlation_id,
                actual: message.correlation_id.clone(),
            });
        }
        (self.handler)(topic, message)
    }

    /// Consume the callback without a response, running its expiry hook.
    pub(crate) fn expire(self) {
        if let Some(hook) = self.on_expired {
            hook();
        }
    }
}

impl std::fmt::Debug for RequestCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCallback")
            .field("correlation_id", &self.correlation_id)
            .field("has_expiry_hook", &self.on_expired.is_some())
            .finish()
    }
}
