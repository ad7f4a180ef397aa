// fingerprint.rs — Fingerprint: one comparable snapshot of a project facet.
//
// `data` is opaque to the pipeline; only the owning aspect interprets it.
// Comparison goes through `sha`, a canonical digest of `data`, so two
// fingerprints with the same name are "the same" exactly when their
// payloads serialize identically.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hasher::digest_value;

/// A named, typed, hashed payload summarizing one facet of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Stable identifier, unique within one extraction pass.
    pub name: String,

    /// Owner tag: the name of the aspect that produced this fingerprint.
    #[serde(rename = "type")]
    pub kind: String,

    /// The payload: coordinates, a digest, file content...
    pub data: Value,

    /// Canonical SHA-256 of `data`.
    pub sha: String,

    /// Payload format revision.
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    Fingerprint::CURRENT_VERSION
}

impl Fingerprint {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(name: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        let sha = digest_value(&data);
        Self {
            name: name.into(),
            kind: kind.into(),
            data,
            sha,
            version: Self::CURRENT_VERSION,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Same payload (and payload format) as `other`.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.sha == other.sha && self.version == other.version
    }

    /// True when `sha` still agrees with `data` (e.g. after loading from disk).
    pub fn verify(&self) -> bool {
        self.sha == digest_value(&self.data)
    }

    /// Decode the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// First 7 characters of the digest, for display.
    pub fn short_sha(&self) -> &str {
        self.sha.get(..7).unwrap_or(&self.sha)
    }
}

/// Find a fingerprint by name.
pub fn find<'a>(fingerprints: &'a [Fingerprint], name: &str) -> Option<&'a Fingerprint> {
    fingerprints.iter().find(|fp| fp.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_payloads_match() {
        let a = Fingerprint::new("deps", "deps", json!(["a@1.0"]));
        let b = Fingerprint::new("deps", "deps", json!(["a@1.0"]));
        let c = Fingerprint::new("deps", "deps", json!(["a@2.0"]));
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn version_change_is_not_a_match() {
        let a = Fingerprint::new("deps", "deps", json!(["a@1.0"]));
        let b = a.clone().with_version(2);
        assert!(!a.matches(&b));
    }

    #[test]
    fn serializes_kind_as_type() {
        let fp = Fingerprint::new("elk-logback", "logback", json!({"content": "<x/>"}));
        let json = serde_json::to_string(&fp).unwrap();
        assert!(json.contains("\"type\":\"logback\""));
        let restored: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, fp);
        assert!(restored.verify());
    }

    #[test]
    fn tampered_data_fails_verification() {
        let mut fp = Fingerprint::new("deps", "deps", json!(["a@1.0"]));
        fp.data = json!(["a@9.9"]);
        assert!(!fp.verify());
    }

    #[test]
    fn data_as_decodes_payload() {
        let fp = Fingerprint::new("deps", "deps", json!(["a@1.0", "b@2.0"]));
        let coords: Vec<String> = fp.data_as().unwrap();
        assert_eq!(coords, vec!["a@1.0", "b@2.0"]);
        assert_eq!(fp.short_sha().len(), 7);
    }

    #[test]
    fn find_by_name() {
        let fps = vec![
            Fingerprint::new("a", "x", json!(1)),
            Fingerprint::new("b", "x", json!(2)),
        ];
        assert_eq!(find(&fps, "b").map(|f| &f.data), Some(&json!(2)));
        assert!(find(&fps, "c").is_none());
    }
}
