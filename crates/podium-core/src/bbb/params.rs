//! Ordered request parameters.
//!
//! Parameters are kept in a sorted map so the canonical query encoding is
//! deterministic regardless of how the map was built. The canonical form is
//! what gets signed, so ordering is load-bearing here.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The checksum parameter is never part of the signed material.
pub const PARAM_CHECKSUM: &str = "checksum";

/// Well-known parameter: the tenant-visible meeting identifier.
pub const PARAM_MEETING_ID: &str = "meetingID";

/// An ordered `key=value` parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// The `meetingID` parameter, if present.
    pub fn meeting_id(&self) -> Option<&str> {
        self.get(PARAM_MEETING_ID)
    }

    /// The `checksum` parameter, if present.
    pub fn checksum(&self) -> Option<&str> {
        self.get(PARAM_CHECKSUM)
    }

    /// Canonical query encoding: keys sorted ascending, values
    /// form-urlencoded (space becomes `+`), `checksum` excluded.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.0 {
            if key == PARAM_CHECKSUM {
                continue;
            }
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(&encode(key));
            out.push('=');
            out.push_str(&encode(value));
        }
        out
    }
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Params {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_encode_to_empty_string() {
        assert_eq!(Params::new().canonical(), "");
    }

    #[test]
    fn canonical_orders_keys_and_drops_checksum() {
        let params = Params::from([
            ("c", "foo"),
            ("a", "23"),
            ("b", "true"),
            ("checksum", "fff0000000000fff"),
        ]);
        assert_eq!(params.canonical(), "a=23&b=true&c=foo");
    }

    #[test]
    fn values_are_url_safe_encoded() {
        let params = Params::from([("name", "Meeting Name")]);
        assert_eq!(params.canonical(), "name=Meeting+Name");
    }

    #[test]
    fn meeting_id_lookup() {
        let p1 = Params::from([("meetingID", "someMeetingID"), ("foo", "bar")]);
        let p2 = Params::from([("foo", "bar")]);

        assert_eq!(p1.meeting_id(), Some("someMeetingID"));
        assert_eq!(p2.meeting_id(), None);
    }

    #[test]
    fn canonical_is_insertion_order_independent() {
        let mut a = Params::new();
        a.set("zulu", "1");
        a.set("alpha", "2");

        let mut b = Params::new();
        b.set("alpha", "2");
        b.set("zulu", "1");

        assert_eq!(a.canonical(), b.canonical());
    }
}
