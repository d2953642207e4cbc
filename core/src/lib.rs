//! Fluent builder for outbound HTTP requests with response interceptors.
//!
//! # Overview
//! A [`RequestBuilder`] collects headers, a body, a cancellation context and
//! response interceptors, freezes them into an `http::Request<Body>` on
//! [`RequestBuilder::materialize`], and sends that request through a
//! [`Transport`]. Interceptors see every response before the caller does,
//! together with an [`ExtractedBody`] classification of its body.
//!
//! # Design
//! - The builder is mutable until it is materialized and frozen after that.
//!   Late mutations and serialization failures are recorded as a deferred
//!   error and returned by the next `materialize` or `send`, never panicked.
//! - The network is behind the [`Transport`] trait. [`UreqTransport`] is the
//!   blocking ureq implementation; closures work as test doubles.
//! - Peeking the response body for interceptors buffers it in memory and
//!   leaves it readable for the caller.

pub use http;

pub mod body;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod interceptor;
pub mod request;
pub mod transport;

pub use body::Body;
pub use config::{ConfigError, TransportConfig};
pub use context::CancelContext;
pub use error::{InterceptorError, RequestError, SendError, TransportError};
pub use extract::{classify_and_extract, BodyFormat, ExtractedBody, FORMAT_KEY};
pub use interceptor::{Interceptor, Interceptors};
pub use request::RequestBuilder;
pub use transport::{Transport, UreqTransport};
