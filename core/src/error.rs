//! Error types for building and sending requests.
//!
//! # Design
//! `RequestError` is what the builder parks in its deferred-error slot. It is
//! `Clone` because the same error is handed back by every later
//! `materialize` and `send` call, so the wrapped library errors sit behind
//! `Arc`. `SendError` is what a single `send` returns; it adds transport
//! failures and interceptor rejections, neither of which is sticky.
//! An interceptor rejection keeps the response so the caller can still
//! inspect it.

use std::sync::Arc;

use thiserror::Error;

use crate::body::Body;

/// Error type returned by response interceptors.
pub type InterceptorError = Box<dyn std::error::Error + Send + Sync>;

/// Failure recorded while configuring or materializing a request.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// `set_json_body` could not encode its value.
    #[error("failed to serialize JSON body: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// A mutator ran after the wire request was generated.
    #[error("tried to modify the request after generating the underlying request")]
    MutationAfterFreeze,

    /// The method, URL, or a header could not form a valid request.
    #[error("failed to construct request: {0}")]
    Construction(#[source] Arc<http::Error>),
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        RequestError::Serialization(Arc::new(err))
    }
}

impl From<http::Error> for RequestError {
    fn from(err: http::Error) -> Self {
        RequestError::Construction(Arc::new(err))
    }
}

/// Failure reported by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Http(#[from] ureq::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors returned by `RequestBuilder::send`.
#[derive(Debug, Error)]
pub enum SendError {
    /// The request was never sent; see the deferred error.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The transport failed; no response exists and no interceptor ran.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An interceptor rejected the response. Later interceptors did not run.
    #[error("interceptor rejected {} response: {source}", .response.status())]
    Intercepted {
        response: Box<http::Response<Body>>,
        source: InterceptorError,
    },
}

impl SendError {
    /// The response an interceptor rejected, if that is what happened.
    pub fn response(&self) -> Option<&http::Response<Body>> {
        match self {
            SendError::Intercepted { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<http::Response<Body>> {
        match self {
            SendError::Intercepted { response, .. } => Some(*response),
            _ => None,
        }
    }

    /// True when the bound context was cancelled or ran out of time.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SendError::Transport(TransportError::Cancelled | TransportError::DeadlineExceeded)
        )
    }
}
