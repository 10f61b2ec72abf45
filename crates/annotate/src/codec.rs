//! Type-aware encoding of values into annotation strings.
//!
//! Writes are first-writer-wins: a key that already exists is never touched.
//! Reads never fail; malformed values are logged and replaced by the default.

use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use spindle_core::{AnnotationError, AttributeStore};
use tracing::{debug, warn};

/// The closed set of value shapes an annotation can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Boolean,
    TextList,
    /// A whole JSON object, e.g. a last-applied manifest.
    Snapshot,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for String {}
    impl Sealed for i64 {}
    impl Sealed for bool {}
    impl Sealed for Vec<String> {}
    impl Sealed for serde_json::Map<String, serde_json::Value> {}
}

/// Rust types that map onto a [`ValueKind`].
pub trait AnnotationValue: Serialize + DeserializeOwned + sealed::Sealed {
    const KIND: ValueKind;

    /// Verbatim form for text values; structured kinds return `None`.
    fn as_text(&self) -> Option<&str> { None }

    fn from_text(_raw: &str) -> Option<Self> { None }
}

impl AnnotationValue for String {
    const KIND: ValueKind = ValueKind::Text;
    fn as_text(&self) -> Option<&str> { Some(self) }
    fn from_text(raw: &str) -> Option<Self> { Some(raw.to_string()) }
}

impl AnnotationValue for i64 {
    const KIND: ValueKind = ValueKind::Integer;
}

impl AnnotationValue for bool {
    const KIND: ValueKind = ValueKind::Boolean;
}

impl AnnotationValue for Vec<String> {
    const KIND: ValueKind = ValueKind::TextList;
}

impl AnnotationValue for serde_json::Map<String, serde_json::Value> {
    const KIND: ValueKind = ValueKind::Snapshot;
}

/// Older writers JSON-encoded text values, leaving them wrapped in quotes.
pub fn looks_like_quoted(raw: &str) -> bool {
    raw.len() > 1 && raw.starts_with('"') && raw.ends_with('"')
}

/// Annotation encoder/decoder. Construct once and pass it to every call site.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    legacy_quotes: bool,
}

impl Default for Codec {
    fn default() -> Self { Self { legacy_quotes: true } }
}

impl Codec {
    pub fn new() -> Self { Self::default() }

    /// Treat quote-wrapped text as literal instead of unwrapping it.
    pub fn without_legacy_quotes(mut self) -> Self {
        self.legacy_quotes = false;
        self
    }

    pub fn encode<T: AnnotationValue>(&self, key: &str, value: &T) -> Result<String, AnnotationError> {
        if let Some(text) = value.as_text() {
            return Ok(text.to_string());
        }
        serde_json::to_string(value).map_err(|source| AnnotationError::Encode { key: key.to_string(), source })
    }

    /// Decode a raw annotation. Failures are logged and yield `None`.
    pub fn decode<T: AnnotationValue>(&self, key: &str, raw: &str) -> Option<T> {
        if T::KIND == ValueKind::Text && !(self.legacy_quotes && looks_like_quoted(raw)) {
            return T::from_text(raw);
        }
        match serde_json::from_str::<T>(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                counter!("annotation_decode_warnings_total", 1u64);
                warn!(key = %key, kind = ?T::KIND, error = %e, "illegally annotated resource; ignoring value");
                None
            }
        }
    }

    /// Store `value` under `key` unless the value is absent or the key is already set.
    pub fn store<T, S>(&self, store: &mut S, key: &str, value: Option<&T>) -> Result<(), AnnotationError>
    where
        T: AnnotationValue,
        S: AttributeStore + ?Sized,
    {
        let Some(value) = value else { return Ok(()) };
        if store.contains(key) {
            debug!(key = %key, "annotation already present; keeping first value");
            return Ok(());
        }
        let encoded = self.encode(key, value)?;
        store.insert_if_absent(key, encoded);
        Ok(())
    }

    pub fn read<T, S>(&self, store: &S, key: &str) -> Option<T>
    where
        T: AnnotationValue,
        S: AttributeStore + ?Sized,
    {
        store.get(key).and_then(|raw| self.decode(key, raw))
    }

    /// Like [`Codec::read`], falling back to `default` when absent or malformed.
    pub fn read_or<T, S>(&self, store: &S, key: &str, default: T) -> T
    where
        T: AnnotationValue,
        S: AttributeStore + ?Sized,
    {
        self.read(store, key).unwrap_or(default)
    }
}
