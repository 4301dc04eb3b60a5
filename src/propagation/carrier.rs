//! Flat header representation used at transport boundaries.

use std::collections::{btree_map, BTreeMap, HashMap};

use http::{HeaderMap, HeaderName, HeaderValue};

/// Header name to header value, keys normalized to lowercase.
///
/// Built from transport metadata just before decoding, or produced by
/// encoding just before an outbound call. Not meant to be kept around.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Carrier {
    entries: BTreeMap<String, String>,
}

impl Carrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect string-valued headers. Repeated headers are joined with `,`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut carrier = Self::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            carrier
                .entries
                .entry(name.as_str().to_owned())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_owned());
        }
        carrier
    }

    /// Write every entry into `headers`, replacing existing values.
    /// Entries that are not valid header names or values are skipped.
    pub fn inject_headers(&self, headers: &mut HeaderMap) {
        for (key, value) in &self.entries {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
    }

    /// Message attributes form of this carrier.
    pub fn into_attributes(self) -> HashMap<String, String> {
        self.entries.into_iter().collect()
    }

    pub fn from_attributes<'a>(attributes: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        attributes
            .into_iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect()
    }
}

impl<'a, V: Into<String>> FromIterator<(&'a str, V)> for Carrier {
    fn from_iter<I: IntoIterator<Item = (&'a str, V)>>(iter: I) -> Self {
        let mut carrier = Self::new();
        for (k, v) in iter {
            carrier.insert(k, v);
        }
        carrier
    }
}

impl IntoIterator for Carrier {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_case_insensitive() {
        let mut carrier = Carrier::new();
        carrier.insert("TraceParent", "x");
        assert_eq!(carrier.get("traceparent"), Some("x"));
        assert_eq!(carrier.get("TRACEPARENT"), Some("x"));
    }

    #[test]
    fn header_map_roundtrip_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("baggage", HeaderValue::from_static("a=1"));
        headers.append("baggage", HeaderValue::from_static("b=2"));
        headers.insert("traceparent", HeaderValue::from_static("tp"));

        let carrier = Carrier::from_headers(&headers);
        assert_eq!(carrier.get("baggage"), Some("a=1,b=2"));

        let mut out = HeaderMap::new();
        carrier.inject_headers(&mut out);
        assert_eq!(out.get("traceparent").unwrap(), "tp");
        assert_eq!(out.get_all("baggage").iter().count(), 1);
    }

    #[test]
    fn invalid_header_values_are_skipped() {
        let mut carrier = Carrier::new();
        carrier.insert("good", "v");
        carrier.insert("bad", "line\nbreak");
        let mut headers = HeaderMap::new();
        carrier.inject_headers(&mut headers);
        assert!(headers.contains_key("good"));
        assert!(!headers.contains_key("bad"));
    }
}
