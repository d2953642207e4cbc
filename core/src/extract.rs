//! Body classification handed to response interceptors.
//!
//! # Design
//! The response body is peeked, not consumed: the stream is drained into
//! memory and left in the response, so whoever receives the response after
//! the interceptors can still read all of it. Only a JSON object counts as
//! structured. The format travels next to the fields rather than inside them,
//! so a response field can never be mistaken for the marker.

use serde_json::{Deserializer, Map, Value};

use crate::body::Body;

/// Reserved key used by [`ExtractedBody::to_tagged_map`].
pub const FORMAT_KEY: &str = "__FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// The body starts with a JSON object.
    Json,
    /// Anything else: empty, non-JSON, or a JSON value that is not an object.
    Raw,
}

impl BodyFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            BodyFormat::Json => "JSON",
            BodyFormat::Raw => "String",
        }
    }
}

/// What an interceptor sees of the response body.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBody {
    format: BodyFormat,
    fields: Map<String, Value>,
}

impl ExtractedBody {
    pub fn raw() -> Self {
        Self {
            format: BodyFormat::Raw,
            fields: Map::new(),
        }
    }

    pub fn json(fields: Map<String, Value>) -> Self {
        Self {
            format: BodyFormat::Json,
            fields,
        }
    }

    pub fn format(&self) -> BodyFormat {
        self.format
    }

    pub fn is_json(&self) -> bool {
        self.format == BodyFormat::Json
    }

    /// Decoded top-level fields. Always empty for raw bodies.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Flat map with the format injected under [`FORMAT_KEY`]. A decoded
    /// field of the same name is overwritten.
    pub fn to_tagged_map(&self) -> Map<String, Value> {
        let mut map = self.fields.clone();
        map.insert(FORMAT_KEY.to_string(), Value::from(self.format.as_str()));
        map
    }
}

/// Peek the response body and classify it.
///
/// The first JSON value in the body is decoded; trailing bytes are ignored.
/// The body remains fully readable afterwards.
pub fn classify_and_extract(response: &mut http::Response<Body>) -> ExtractedBody {
    let bytes = match response.body_mut().buffer() {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "failed to read response body, treating it as raw");
            return ExtractedBody::raw();
        }
    };
    match Deserializer::from_slice(&bytes).into_iter::<Map<String, Value>>().next() {
        Some(Ok(fields)) => ExtractedBody::json(fields),
        _ => ExtractedBody::raw(),
    }
}
