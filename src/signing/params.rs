//! Canonical recognition parameters.
//!
//! Both signing schemes consume the same parameter table. The table is a
//! `BTreeMap`, so serialization is always lexicographic by key. That
//! ordering is part of the signature contract and must never depend on how
//! the caller populated the overrides.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default recognition engine (16 kHz Mandarin).
pub const DEFAULT_ENGINE_MODEL_TYPE: &str = "16k_zh";

/// Default audio container (`1` = raw PCM).
pub const DEFAULT_VOICE_FORMAT: &str = "1";

/// Server-side voice activity detection enabled by default.
pub const DEFAULT_NEEDVAD: &str = "1";

/// Profanity/filler/punctuation filters off by default.
pub const DEFAULT_FILTER: &str = "0";

/// Spoken numbers converted to digits by default.
pub const DEFAULT_CONVERT_NUM_MODE: &str = "1";

/// Signed URLs stay valid for five minutes.
pub const EXPIRY_WINDOW_SECS: u64 = 300;

/// Exclusive upper bound for generated nonces.
pub const NONCE_BOUND: u32 = 1_000_000;

/// Percent-encoding set matching JavaScript's `encodeURIComponent`:
/// everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode one query value.
pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Caller-supplied parameter overrides for one recognition session.
///
/// Every field is optional; unset fields take the documented defaults when
/// the table is resolved. `timestamp`, `nonce` and `voice_id` are normally
/// left unset so each connection attempt gets fresh values, but pinning them
/// makes the signature fully reproducible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionParams {
    pub engine_model_type: Option<String>,
    pub voice_format: Option<String>,
    pub needvad: Option<String>,
    pub filter_dirty: Option<String>,
    pub filter_modal: Option<String>,
    pub filter_punc: Option<String>,
    pub convert_num_mode: Option<String>,
    pub voice_id: Option<String>,
    pub timestamp: Option<u64>,
    pub nonce: Option<u32>,
}

impl SessionParams {
    /// Resolve the table with a fresh timestamp, random nonce and generated
    /// voice id for any field the caller left unset.
    pub fn resolve(&self) -> ResolvedParams {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let nonce = rand::thread_rng().gen_range(0..NONCE_BOUND);
        let voice_id = Uuid::new_v4().to_string();
        self.resolve_with(now, nonce, &voice_id)
    }

    /// Deterministic resolution: given the same inputs, the resulting table
    /// (and thus any signature over it) is byte-identical. Overrides set on
    /// `self` take precedence over the supplied values.
    pub fn resolve_with(&self, timestamp: u64, nonce: u32, voice_id: &str) -> ResolvedParams {
        let timestamp = self.timestamp.unwrap_or(timestamp);
        let nonce = self.nonce.unwrap_or(nonce);
        let voice_id = self.voice_id.as_deref().unwrap_or(voice_id);

        let or = |field: &Option<String>, default: &str| {
            field.as_deref().unwrap_or(default).to_string()
        };

        let mut map = BTreeMap::new();
        map.insert(
            "engine_model_type".into(),
            or(&self.engine_model_type, DEFAULT_ENGINE_MODEL_TYPE),
        );
        map.insert("voice_format".into(), or(&self.voice_format, DEFAULT_VOICE_FORMAT));
        map.insert("needvad".into(), or(&self.needvad, DEFAULT_NEEDVAD));
        map.insert("filter_dirty".into(), or(&self.filter_dirty, DEFAULT_FILTER));
        map.insert("filter_modal".into(), or(&self.filter_modal, DEFAULT_FILTER));
        map.insert("filter_punc".into(), or(&self.filter_punc, DEFAULT_FILTER));
        map.insert(
            "convert_num_mode".into(),
            or(&self.convert_num_mode, DEFAULT_CONVERT_NUM_MODE),
        );
        map.insert("timestamp".into(), timestamp.to_string());
        map.insert("expired".into(), (timestamp + EXPIRY_WINDOW_SECS).to_string());
        map.insert("nonce".into(), nonce.to_string());
        map.insert("voice_id".into(), voice_id.to_string());

        ResolvedParams { map, timestamp }
    }
}

/// The immutable, fully resolved parameter table for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParams {
    map: BTreeMap<String, String>,
    timestamp: u64,
}

impl ResolvedParams {
    /// The Unix timestamp the table was resolved against.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Look up a resolved parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// The voice id carried by this table.
    pub fn voice_id(&self) -> &str {
        self.map.get("voice_id").map(String::as_str).unwrap_or("")
    }

    /// Iterate entries in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize the table (plus `secretid`) as the canonical
    /// `key=encoded-value` query string, keys in lexicographic order.
    pub fn canonical_query(&self, secret_id: &str) -> String {
        let mut entries: BTreeMap<&str, &str> = self
            .map
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.insert("secretid", secret_id);
        entries
            .iter()
            .map(|(k, v)| format!("{k}={}", encode_component(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
