//! Fluent request builder with a one-way freeze.
//!
//! # Design
//! `RequestBuilder` accumulates headers, a body, a cancellation context and
//! response interceptors in a draft. `materialize` turns the draft into an
//! `http::Request<Body>` exactly once; after that the request is frozen and
//! every mutator is a no-op that records `RequestError::MutationAfterFreeze`.
//!
//! Failures never interrupt the chain. They land in a deferred-error slot
//! that keeps the first error written, and every later `materialize` or
//! `send` returns it. A failed serialization does the same before anything
//! was frozen, and the builder accepts no further changes.
//!
//! The builder is a single-owner value with no internal locking; share it
//! across threads only behind your own synchronization.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::mem;

use http::StatusCode;
use serde::Serialize;

use crate::body::Body;
use crate::context::CancelContext;
use crate::error::{InterceptorError, RequestError, SendError};
use crate::extract::ExtractedBody;
use crate::interceptor::Interceptors;
use crate::transport::Transport;

pub struct RequestBuilder {
    method: String,
    url: String,
    stage: Stage,
    interceptors: Interceptors,
    deferred_error: Option<RequestError>,
}

enum Stage {
    Draft(Draft),
    Frozen(http::Request<Body>),
    /// Construction failed; the cause is in `deferred_error`.
    Failed,
}

#[derive(Default)]
struct Draft {
    headers: HashMap<String, Vec<String>>,
    body: Body,
    context: Option<CancelContext>,
}

impl Draft {
    fn into_request(self, method: &str, url: &str) -> Result<http::Request<Body>, RequestError> {
        let mut builder = http::Request::builder().method(method).uri(url);
        for (key, values) in &self.headers {
            for value in values {
                builder = builder.header(key.as_str(), value.as_str());
            }
        }
        if let Some(context) = self.context {
            builder = builder.extension(context);
        }
        Ok(builder.body(self.body)?)
    }
}

impl RequestBuilder {
    /// Start a draft for any method. Neither argument is checked until `materialize`.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            stage: Stage::Draft(Draft::default()),
            interceptors: Interceptors::default(),
            deferred_error: None,
        }
    }

    /// Draft a `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Draft a `POST`.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// Draft a `PUT`.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new("PUT", url)
    }

    /// Draft a `DELETE`.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    /// The method as given, unvalidated.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The URL as given, unvalidated.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// True once `materialize` has run, whether or not it succeeded.
    pub fn is_frozen(&self) -> bool {
        !matches!(self.stage, Stage::Draft(_))
    }

    /// The first error recorded so far, if any.
    pub fn deferred_error(&self) -> Option<&RequestError> {
        self.deferred_error.as_ref()
    }

    /// Replace all values of `key` with `value`.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        if let Some(draft) = self.draft_mut() {
            draft.headers.insert(key.into(), vec![value.into()]);
        }
        self
    }

    /// Append `value` to the values of `key`.
    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        if let Some(draft) = self.draft_mut() {
            draft.headers.entry(key.into()).or_default().push(value.into());
        }
        self
    }

    /// `set_header` for every pair.
    pub fn set_headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(draft) = self.draft_mut() {
            for (key, value) in headers {
                draft.headers.insert(key.into(), vec![value.into()]);
            }
        }
        self
    }

    /// Replace the whole value list of every given key.
    pub fn set_multi_value_headers<I, K, L, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, L)>,
        K: Into<String>,
        L: IntoIterator<Item = V>,
        V: Into<String>,
    {
        if let Some(draft) = self.draft_mut() {
            for (key, values) in headers {
                draft
                    .headers
                    .insert(key.into(), values.into_iter().map(Into::into).collect());
            }
        }
        self
    }

    /// Set `Authorization: Bearer <token>`, replacing any earlier value.
    pub fn set_auth_token(&mut self, token: impl Display) -> &mut Self {
        self.set_header("Authorization", format!("Bearer {token}"))
    }

    /// Replace the body. Headers are left alone.
    pub fn set_body(&mut self, body: impl Into<Body>) -> &mut Self {
        if let Some(draft) = self.draft_mut() {
            draft.body = body.into();
        }
        self
    }

    /// Serialize `value` as the body and set `Content-Type: application/json`.
    ///
    /// If serialization fails nothing changes and the error is deferred.
    pub fn set_json_body<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        if self.draft_mut().is_none() {
            return self;
        }
        match serde_json::to_vec(value) {
            Ok(payload) => self
                .set_body(payload)
                .set_header("Content-Type", "application/json"),
            Err(err) => {
                self.defer(err.into());
                self
            }
        }
    }

    /// Bind a context that `send` honours before and during the call.
    pub fn set_cancel_context(&mut self, context: CancelContext) -> &mut Self {
        if let Some(draft) = self.draft_mut() {
            draft.context = Some(context);
        }
        self
    }

    /// Register an interceptor run on every response.
    pub fn add_generic_interceptor<F>(&mut self, interceptor: F) -> &mut Self
    where
        F: Fn(&ExtractedBody, &http::Response<Body>) -> Result<(), InterceptorError> + Send + 'static,
    {
        if self.draft_mut().is_some() {
            self.interceptors.add_generic(Box::new(interceptor));
        }
        self
    }

    /// Register an interceptor run only on responses with `status`.
    pub fn add_status_interceptor<F>(&mut self, status: StatusCode, interceptor: F) -> &mut Self
    where
        F: Fn(&ExtractedBody, &http::Response<Body>) -> Result<(), InterceptorError> + Send + 'static,
    {
        if self.draft_mut().is_some() {
            self.interceptors.add_for_status(status, Box::new(interceptor));
        }
        self
    }

    /// Generate the wire request, or return the one generated earlier.
    ///
    /// Header keys are applied in no particular order; the values of each key
    /// keep their order. Draft keys are case-sensitive, so `X-A` and `x-a`
    /// only merge here, in the wire request's header map.
    pub fn materialize(&mut self) -> Result<&http::Request<Body>, RequestError> {
        if let Some(err) = &self.deferred_error {
            return Err(err.clone());
        }
        self.stage = match mem::replace(&mut self.stage, Stage::Failed) {
            Stage::Draft(draft) => self.freeze(draft),
            done => done,
        };
        match (&self.stage, &self.deferred_error) {
            (_, Some(err)) => Err(err.clone()),
            (Stage::Frozen(request), None) => Ok(request),
            _ => Err(RequestError::MutationAfterFreeze),
        }
    }

    /// Materialize if needed, execute through `transport`, and run the
    /// interceptors over the response.
    ///
    /// Each call goes to the transport again with the same frozen request.
    pub fn send<T>(&mut self, transport: &T) -> Result<http::Response<Body>, SendError>
    where
        T: Transport + ?Sized,
    {
        let request = self.materialize()?;
        tracing::debug!(method = %request.method(), uri = %request.uri(), "sending request");
        let response = transport.execute(request).map_err(|err| {
            tracing::debug!(error = %err, "transport failed");
            err
        })?;
        self.interceptors.validate(response)
    }

    fn freeze(&mut self, draft: Draft) -> Stage {
        let header_count = draft.headers.len();
        match draft.into_request(&self.method, &self.url) {
            Ok(request) => {
                tracing::debug!(
                    method = %request.method(),
                    uri = %request.uri(),
                    headers = header_count,
                    "request materialized"
                );
                Stage::Frozen(request)
            }
            Err(err) => {
                tracing::debug!(method = %self.method, url = %self.url, error = %err, "request construction failed");
                self.defer(err);
                Stage::Failed
            }
        }
    }

    /// The draft, if mutation is still allowed. A frozen builder records
    /// `MutationAfterFreeze` instead.
    fn draft_mut(&mut self) -> Option<&mut Draft> {
        if self.is_frozen() {
            tracing::debug!(method = %self.method, url = %self.url, "mutation after freeze rejected");
            self.defer(RequestError::MutationAfterFreeze);
            return None;
        }
        if self.deferred_error.is_some() {
            return None;
        }
        match &mut self.stage {
            Stage::Draft(draft) => Some(draft),
            _ => None,
        }
    }

    fn defer(&mut self, err: RequestError) {
        self.deferred_error.get_or_insert(err);
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match &self.stage {
            Stage::Draft(_) => "draft",
            Stage::Frozen(_) => "frozen",
            Stage::Failed => "failed",
        };
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("stage", &stage)
            .field("interceptors", &self.interceptors)
            .field("deferred_error", &self.deferred_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const URL: &str = "http://localhost:3000/items";

    fn values<'a>(request: &'a http::Request<Body>, key: &str) -> Vec<&'a str> {
        request
            .headers()
            .get_all(key)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect()
    }

    fn reply(
        status: u16,
        body: &'static str,
    ) -> impl Fn(&http::Request<Body>) -> Result<http::Response<Body>, TransportError> {
        move |_: &http::Request<Body>| {
            Ok(http::Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap())
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("boom"))
        }
    }

    #[test]
    fn header_mutations_follow_set_add_replace_semantics() {
        let mut req = RequestBuilder::get(URL);
        req.add_header("X-A", "1")
            .add_header("X-A", "2")
            .set_header("X-B", "old")
            .add_header("X-B", "kept")
            .set_header("X-B", "new")
            .set_multi_value_headers([("X-C", vec!["c1", "c2"])])
            .add_header("X-C", "c3")
            .set_multi_value_headers([("X-C", vec!["only"])])
            .set_headers([("X-D", "d")]);

        let request = req.materialize().unwrap();
        assert_eq!(values(request, "x-a"), ["1", "2"]);
        assert_eq!(values(request, "x-b"), ["new"]);
        assert_eq!(values(request, "x-c"), ["only"]);
        assert_eq!(values(request, "x-d"), ["d"]);
    }

    #[test]
    fn auth_token_is_a_bearer_header() {
        let mut req = RequestBuilder::get(URL);
        req.add_header("Authorization", "Basic abc").set_auth_token("t0k3n");
        assert_eq!(values(req.materialize().unwrap(), "authorization"), ["Bearer t0k3n"]);
    }

    #[test]
    fn json_body_sets_payload_and_content_type() {
        let mut req = RequestBuilder::post(URL);
        req.add_header("Content-Type", "text/plain")
            .set_json_body(&serde_json::json!({"title": "Buy milk"}));

        let request = req.materialize().unwrap();
        assert_eq!(values(request, "content-type"), ["application/json"]);
        let body: serde_json::Value = serde_json::from_slice(request.body().as_bytes().unwrap()).unwrap();
        assert_eq!(body["title"], "Buy milk");
    }

    #[test]
    fn json_body_of_nothing_is_null() {
        let mut req = RequestBuilder::post(URL);
        req.set_json_body(&None::<u32>);
        assert_eq!(req.materialize().unwrap().body().as_bytes().unwrap().as_ref(), b"null");

        let mut req = RequestBuilder::post(URL);
        req.set_json_body(&());
        assert_eq!(req.materialize().unwrap().body().as_bytes().unwrap().as_ref(), b"null");
    }

    #[test]
    fn failed_serialization_is_deferred_without_partial_changes() {
        let mut req = RequestBuilder::post(URL);
        req.set_body("original").set_json_body(&Unserializable);

        assert!(matches!(req.deferred_error(), Some(RequestError::Serialization(_))));
        assert!(!req.is_frozen());
        let err = req.materialize().unwrap_err();
        assert!(matches!(err, RequestError::Serialization(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn deferred_error_is_first_write_wins() {
        let mut req = RequestBuilder::post(URL);
        req.set_json_body(&Unserializable);
        assert!(req.materialize().is_err());
        // the builder never froze, so later calls keep the first error
        req.set_header("X-Late", "1");
        assert!(matches!(req.materialize(), Err(RequestError::Serialization(_))));
    }

    #[test]
    fn mutation_after_freeze_is_rejected_and_flagged() {
        let mut req = RequestBuilder::get(URL);
        req.set_header("X-A", "1");
        assert!(req.materialize().is_ok());
        assert!(req.is_frozen());

        req.set_header("X-A", "2").set_body("late");
        assert!(matches!(req.deferred_error(), Some(RequestError::MutationAfterFreeze)));
        assert!(matches!(req.materialize(), Err(RequestError::MutationAfterFreeze)));

        let calls = Cell::new(0);
        let transport = |_: &http::Request<Body>| {
            calls.set(calls.get() + 1);
            reply(200, "")(&http::Request::new(Body::empty()))
        };
        let err = req.send(&transport).unwrap_err();
        assert!(matches!(err, SendError::Request(RequestError::MutationAfterFreeze)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn every_mutator_is_guarded_after_freeze() {
        type Mutation = fn(&mut RequestBuilder);
        let mutations: [Mutation; 8] = [
            |r| {
                r.add_header("k", "v");
            },
            |r| {
                r.set_headers([("k", "v")]);
            },
            |r| {
                r.set_multi_value_headers([("k", ["v"])]);
            },
            |r| {
                r.set_auth_token("t");
            },
            |r| {
                r.set_json_body(&1);
            },
            |r| {
                r.set_cancel_context(CancelContext::new());
            },
            |r| {
                r.add_generic_interceptor(|_, _| Ok(()));
            },
            |r| {
                r.add_status_interceptor(StatusCode::OK, |_, _| Ok(()));
            },
        ];
        for (i, mutate) in mutations.iter().enumerate() {
            let mut req = RequestBuilder::get(URL);
            req.materialize().unwrap();
            mutate(&mut req);
            assert!(
                matches!(req.materialize(), Err(RequestError::MutationAfterFreeze)),
                "mutation #{i} was not guarded"
            );
        }
    }

    #[test]
    fn materialize_is_idempotent() {
        let mut req = RequestBuilder::get(URL);
        req.add_header("X-A", "1");
        let first: *const http::Request<Body> = req.materialize().unwrap();
        let second = req.materialize().unwrap();
        assert!(std::ptr::eq(first, second));
        // headers were applied once
        assert_eq!(values(second, "x-a"), ["1"]);
    }

    #[test]
    fn construction_failure_is_cached() {
        let mut req = RequestBuilder::get("http://bad host/");
        let err = req.materialize().unwrap_err();
        assert!(matches!(err, RequestError::Construction(_)));
        assert!(req.is_frozen());
        // later mutations do not overwrite the original cause
        req.set_header("X-A", "1");
        assert!(matches!(req.materialize(), Err(RequestError::Construction(_))));
    }

    #[test]
    fn invalid_header_name_fails_construction() {
        let mut req = RequestBuilder::get(URL);
        req.set_header("bad header", "v");
        assert!(matches!(req.materialize(), Err(RequestError::Construction(_))));
    }

    #[test]
    fn invalid_method_fails_construction() {
        let mut req = RequestBuilder::new("GE T", URL);
        assert!(matches!(req.materialize(), Err(RequestError::Construction(_))));
    }

    #[test]
    fn context_is_bound_to_the_wire_request() {
        let ctx = CancelContext::new();
        let mut req = RequestBuilder::get(URL);
        req.set_cancel_context(ctx.clone());
        let request = req.materialize().unwrap();
        let bound = request.extensions().get::<CancelContext>().unwrap();
        ctx.cancel();
        assert!(bound.is_cancelled());
    }

    #[test]
    fn send_materializes_and_resends_the_same_request() {
        let calls = AtomicUsize::new(0);
        let transport = |request: &http::Request<Body>| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.headers()["x-a"], "1");
            reply(200, "ok")(request)
        };
        let mut req = RequestBuilder::get(URL);
        req.set_header("X-A", "1");

        assert_eq!(req.send(&transport).unwrap().status(), 200);
        assert!(req.is_frozen());
        assert_eq!(req.send(&transport).unwrap().status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transport_failure_skips_interceptors() {
        let called = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&called);
        let mut req = RequestBuilder::get(URL);
        req.add_generic_interceptor(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let transport = |_: &http::Request<Body>| -> Result<http::Response<Body>, TransportError> {
            Err(TransportError::Cancelled)
        };

        let err = req.send(&transport).unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.response().is_none());
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn status_interceptor_error_returns_response_and_skips_generic() {
        let generic_calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&generic_calls);
        let mut req = RequestBuilder::get(URL);
        req.add_status_interceptor(StatusCode::NOT_FOUND, |_, response| {
            Err(format!("{} from upstream", response.status()).into())
        })
        .add_generic_interceptor(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = req.send(&reply(404, r#"{"status":"not found"}"#)).unwrap_err();
        assert_eq!(generic_calls.load(Ordering::SeqCst), 0);
        match err {
            SendError::Intercepted { response, source } => {
                assert_eq!(source.to_string(), "404 Not Found from upstream");
                assert_eq!(response.status(), StatusCode::NOT_FOUND);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn generic_interceptor_sees_structured_body_and_body_stays_readable() {
        let captured = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&captured);
        let mut req = RequestBuilder::get(URL);
        req.add_generic_interceptor(move |body, _| {
            *slot.lock().unwrap() = Some(body.clone());
            Ok(())
        });

        let response = req.send(&reply(200, r#"{"status":"ok"}"#)).unwrap();
        let body = captured.lock().unwrap().take().unwrap();
        assert!(body.is_json());
        assert_eq!(body.get("status"), Some(&serde_json::Value::from("ok")));
        assert_eq!(response.into_body().into_string().unwrap(), r#"{"status":"ok"}"#);
    }
}
