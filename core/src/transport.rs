//! The transport collaborator: executes a frozen wire request.
//!
//! # Design
//! The builder never talks to the network itself. `send` hands the frozen
//! request to a [`Transport`], which keeps the builder testable with plain
//! closures. [`UreqTransport`] is the real implementation. It honours the
//! [`CancelContext`] bound to the request. A context that is already done
//! fails before any I/O. With a live context the blocking ureq call runs on
//! a worker thread while the caller watches the context, so a cancel from
//! another thread returns at once; the abandoned call finishes on its own and
//! its result is dropped. A deadline also caps the ureq timeout for the call.
//! A stream body is drained into the request on first send so ureq can send
//! it with a content length and a re-send carries the same bytes.
//! Non-2xx statuses are returned as responses, never as errors, because
//! status handling belongs to the interceptors.

use std::fmt;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use ureq::{Agent, AsSendBody};

use crate::body::Body;
use crate::config::TransportConfig;
use crate::context::CancelContext;
use crate::error::TransportError;

/// How often a waiting caller looks at its context while the call is in flight.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Executes one wire request and returns the raw response.
pub trait Transport {
    fn execute(&self, request: &http::Request<Body>) -> Result<http::Response<Body>, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&http::Request<Body>) -> Result<http::Response<Body>, TransportError>,
{
    fn execute(&self, request: &http::Request<Body>) -> Result<http::Response<Body>, TransportError> {
        self(request)
    }
}

/// Blocking transport backed by a shared `ureq::Agent`.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
    config: TransportConfig,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl UreqTransport {
    pub fn new(config: TransportConfig) -> Self {
        let agent = build_agent(&config, config.timeout());
        Self { agent, config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The shared agent, or a one-off agent when the request deadline is
    /// tighter than the configured timeout.
    fn agent_for(&self, context: Option<&CancelContext>) -> Agent {
        let remaining = context.and_then(CancelContext::remaining);
        match (remaining, self.config.timeout()) {
            (Some(left), Some(configured)) if left < configured => build_agent(&self.config, Some(left)),
            (Some(left), None) => build_agent(&self.config, Some(left)),
            _ => self.agent.clone(),
        }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &http::Request<Body>) -> Result<http::Response<Body>, TransportError> {
        let context = request.extensions().get::<CancelContext>();
        if let Some(context) = context {
            context.check()?;
        }
        let agent = self.agent_for(context);
        tracing::debug!(method = %request.method(), uri = %request.uri(), "executing request");

        let response = match request.body().load()? {
            Some(bytes) => dispatch(agent, wire(request, bytes.to_vec()), context),
            None => dispatch(agent, wire(request, ()), context),
        }?;

        let mut response = response.map(|body| Body::from_reader(body.into_reader()));
        if let Some(context) = context {
            response.extensions_mut().insert(context.clone());
        }
        Ok(response)
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport").field("config", &self.config).finish()
    }
}

fn build_agent(config: &TransportConfig, timeout: Option<Duration>) -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .https_only(config.https_only)
        .max_redirects(config.max_redirects)
        .timeout_global(timeout)
        .build()
        .new_agent()
}

fn wire<B>(request: &http::Request<Body>, body: B) -> http::Request<B> {
    let mut wire = http::Request::new(body);
    *wire.method_mut() = request.method().clone();
    *wire.uri_mut() = request.uri().clone();
    *wire.headers_mut() = request.headers().clone();
    wire
}

/// Run the call inline, or on a worker thread when there is a context to
/// watch.
fn dispatch<B>(
    agent: Agent,
    wire: http::Request<B>,
    context: Option<&CancelContext>,
) -> Result<http::Response<ureq::Body>, TransportError>
where
    B: AsSendBody + Send + 'static,
{
    let Some(context) = context else {
        return agent.run(wire).map_err(TransportError::Http);
    };

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("request-intent-call".to_string())
        .spawn(move || {
            // the receiver is gone once the caller gave up
            let _ = tx.send(agent.run(wire));
        })?;

    loop {
        match rx.recv_timeout(CANCEL_POLL) {
            Ok(result) => return result.map_err(|err| classify(err, context)),
            Err(RecvTimeoutError::Timeout) => {
                if let Err(err) = context.check() {
                    tracing::debug!(error = %err, "abandoning in-flight request");
                    return Err(err);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::other("transport worker exited without a result").into());
            }
        }
    }
}

/// A ureq timeout is the context's deadline only when that deadline has
/// actually passed; otherwise the configured timeout fired first.
fn classify(err: ureq::Error, context: &CancelContext) -> TransportError {
    match err {
        ureq::Error::Timeout(_) if context.remaining() == Some(Duration::ZERO) => TransportError::DeadlineExceeded,
        other => TransportError::Http(other),
    }
}
