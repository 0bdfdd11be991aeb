//! Domain-action handlers invoked where a request terminates

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope::{ErrorCode, Payload, Request};

/// Failure answered with an error envelope
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl HandlerError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl From<crate::error::OverlayError> for HandlerError {
    fn from(e: crate::error::OverlayError) -> Self {
        HandlerError::new(e.error_code(), e.to_string())
    }
}

/// Produces the response payload for one action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, request: &Request) -> Result<Payload, HandlerError>;
}

/// Adapter turning an async closure into an `ActionHandler`
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send,
{
    async fn handle(&self, request: &Request) -> Result<Payload, HandlerError> {
        (self.f)(request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Action;
    use crate::routing::Destination;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = FnHandler::new(|request: Request| async move {
            match request.action {
                Action::Heartbeat => Payload::json(json!({"currentTime": "2026-01-01T00:00:00Z"}))
                    .map_err(HandlerError::from),
                _ => Err(HandlerError::new(ErrorCode::NotSupported, "unsupported")),
            }
        });

        let heartbeat = Request::new(Action::Heartbeat, Payload::empty(), Destination::Csms);
        let payload = handler.handle(&heartbeat).await.unwrap();
        assert_eq!(payload.as_json().unwrap()["currentTime"], "2026-01-01T00:00:00Z");

        let reset = Request::new(Action::Reset, Payload::empty(), Destination::Csms);
        let error = handler.handle(&reset).await.unwrap_err();
        assert_eq!(error.code, ErrorCode::NotSupported);
    }
}
