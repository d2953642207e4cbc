//! Response interceptor registry and the validation pass run after `send`.
//!
//! Status-specific interceptors for the response's status run first, then the
//! generic ones, all in registration order. The first error stops the chain.

use std::collections::HashMap;

use http::StatusCode;

use crate::body::Body;
use crate::error::{InterceptorError, SendError};
use crate::extract::{classify_and_extract, ExtractedBody};

/// Handler invoked with the classified body and the received response.
pub type Interceptor =
    Box<dyn Fn(&ExtractedBody, &http::Response<Body>) -> Result<(), InterceptorError> + Send>;

#[derive(Default)]
pub struct Interceptors {
    generic: Vec<Interceptor>,
    by_status: HashMap<StatusCode, Vec<Interceptor>>,
}

impl Interceptors {
    pub fn add_generic(&mut self, interceptor: Interceptor) {
        self.generic.push(interceptor);
    }

    pub fn add_for_status(&mut self, status: StatusCode, interceptor: Interceptor) {
        self.by_status.entry(status).or_default().push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.generic.is_empty() && self.by_status.is_empty()
    }

    /// Run the chain over `response`.
    ///
    /// The body is peeked once and shared by every interceptor. On rejection
    /// the response comes back inside [`SendError::Intercepted`].
    pub fn validate(&self, mut response: http::Response<Body>) -> Result<http::Response<Body>, SendError> {
        if self.is_empty() {
            return Ok(response);
        }
        let extracted = classify_and_extract(&mut response);
        let status = response.status();
        let for_status = self.by_status.get(&status).map(Vec::as_slice).unwrap_or_default();
        tracing::trace!(
            status = %status,
            status_interceptors = for_status.len(),
            generic_interceptors = self.generic.len(),
            "running response interceptors"
        );

        let chain = for_status
            .iter()
            .map(|i| ("status", i))
            .chain(self.generic.iter().map(|i| ("generic", i)));
        for (stage, interceptor) in chain {
            if let Err(source) = interceptor(&extracted, &response) {
                tracing::debug!(status = %status, stage, error = %source, "interceptor rejected response");
                return Err(SendError::Intercepted {
                    response: Box::new(response),
                    source,
                });
            }
        }
        Ok(response)
    }
}

impl std::fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut statuses: Vec<_> = self.by_status.keys().map(StatusCode::as_u16).collect();
        statuses.sort_unstable();
        f.debug_struct("Interceptors")
            .field("generic", &self.generic.len())
            .field("statuses", &statuses)
            .finish()
    }
}
