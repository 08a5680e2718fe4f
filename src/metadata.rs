//! Carrier adapters between [`tonic::metadata::MetadataMap`] and the
//! OpenTelemetry propagation traits.
//!
//! A propagator only ever needs three operations over a call's metadata:
//! read the first value for a key, replace the values for a key, and list
//! the keys. These adapters provide exactly that, as borrows; they never
//! own or copy the map, so whatever the propagator writes is what the
//! transport transmits.

use opentelemetry::propagation::{Extractor, Injector};
use tonic::metadata::{KeyRef, MetadataKey, MetadataMap, MetadataValue};

/// Read-only view over a call's metadata for trace-context extraction.
pub struct MetadataExtractor<'a>(
    /// The borrowed metadata of the call.
    pub &'a MetadataMap,
);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.to_str().ok()
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|key| match key {
                KeyRef::Ascii(key) => key.as_str(),
                KeyRef::Binary(key) => key.as_str(),
            })
            .collect()
    }
}

/// Write view over a call's metadata for trace-context injection.
///
/// Keys or values that fail metadata validation are dropped with a debug
/// log line; propagation must never fail a call.
pub struct MetadataInjector<'a>(
    /// The borrowed metadata of the call.
    pub &'a mut MetadataMap,
);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        match MetadataKey::from_bytes(key.as_bytes()) {
            Ok(key) => match MetadataValue::try_from(&value) {
                Ok(value) => {
                    self.0.insert(key, value);
                }
                Err(error) => tracing::debug!(value, error = %error, "parse metadata value"),
            },
            Err(error) => tracing::debug!(key, error = %error, "parse metadata key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractor_returns_first_value() {
        let mut map = MetadataMap::new();
        map.append("traceparent", "first".parse().unwrap());
        map.append("traceparent", "second".parse().unwrap());

        let extractor = MetadataExtractor(&map);
        assert_eq!(extractor.get("traceparent"), Some("first"));
    }

    #[test]
    fn extractor_missing_key_is_none() {
        let map = MetadataMap::new();
        let extractor = MetadataExtractor(&map);
        assert_eq!(extractor.get("traceparent"), None);
    }

    #[test]
    fn extractor_lists_distinct_keys() {
        let mut map = MetadataMap::new();
        map.insert("traceparent", "value".parse().unwrap());
        map.insert("tracestate", "value".parse().unwrap());

        let keys = MetadataExtractor(&map).keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"traceparent"));
        assert!(keys.contains(&"tracestate"));
    }

    #[test]
    fn injector_replaces_previous_values() {
        let mut map = MetadataMap::new();
        map.append("traceparent", "stale".parse().unwrap());
        map.append("traceparent", "staler".parse().unwrap());

        MetadataInjector(&mut map).set("traceparent", "fresh".to_owned());

        let values: Vec<_> = map.get_all("traceparent").iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].to_str().unwrap(), "fresh");
    }

    #[test]
    fn injector_ignores_invalid_key() {
        let mut map = MetadataMap::new();
        MetadataInjector(&mut map).set("not a key", "value".to_owned());
        assert!(map.is_empty());
    }
}
