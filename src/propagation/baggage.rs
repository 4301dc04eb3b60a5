//! `baggage` header: comma-separated `key=value` members, percent-encoded.

use std::collections::BTreeMap;

/// Upper bound on members in one baggage.
pub const MAX_MEMBERS: usize = 180;

/// Upper bound on the rendered header length, in bytes.
pub const MAX_HEADER_BYTES: usize = 8192;

/// Key-value pairs propagated alongside a trace context.
///
/// Always fits in one header: at most [`MAX_MEMBERS`] members rendering to
/// at most [`MAX_HEADER_BYTES`] bytes. Whatever is accepted survives an
/// encode and decode unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baggage {
    entries: BTreeMap<String, String>,
}

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Insert or replace a member. Returns `false`, leaving the baggage
    /// unchanged, for an empty key or a member that would break either cap.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if key.is_empty() {
            return false;
        }
        let value = value.into();

        let (members, bytes) = match self.entries.get(&key) {
            Some(old) => (
                self.len(),
                self.header_len() - member_len(&key, old) + member_len(&key, &value),
            ),
            None => {
                let comma = usize::from(!self.is_empty());
                (self.len() + 1, self.header_len() + comma + member_len(&key, &value))
            }
        };
        if members > MAX_MEMBERS || bytes > MAX_HEADER_BYTES {
            return false;
        }

        self.entries.insert(key, value);
        true
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

    /// Length of the rendered header, in bytes.
    pub fn header_len(&self) -> usize {
        let members: usize = self.entries.iter().map(|(k, v)| member_len(k, v)).sum();
        members + self.len().saturating_sub(1)
    }

    /// Render as a header value, or `None` when there is nothing to send.
    pub fn to_header(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let members: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        Some(members.join(","))
    }

    /// Parse a header value. Malformed members are skipped individually;
    /// members past the byte cap or the member cap are dropped.
    pub fn parse(value: &str) -> Self {
        let mut baggage = Self::new();
        let mut consumed = 0;
        for member in value.split(',') {
            consumed += member.len() + usize::from(consumed > 0);
            if consumed > MAX_HEADER_BYTES || baggage.len() >= MAX_MEMBERS {
                break;
            }
            // Member properties (`;prop`) are not propagated.
            let pair = member.split(';').next().unwrap_or_default();
            let Some((key, val)) = pair.split_once('=') else {
                continue;
            };
            let (Ok(key), Ok(val)) = (
                urlencoding::decode(key.trim()),
                urlencoding::decode(val.trim()),
            ) else {
                continue;
            };
            baggage.insert(key.into_owned(), val.into_owned());
        }
        baggage
    }
}

fn member_len(key: &str, value: &str) -> usize {
    urlencoding::encode(key).len() + 1 + urlencoding::encode(value).len()
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Baggage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut baggage = Self::new();
        for (k, v) in iter {
            baggage.insert(k, v);
        }
        baggage
    }
}
