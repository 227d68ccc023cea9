//! Request signing for the recognition service.
//!
//! Produces the authenticated WebSocket URL a session connects to. Two
//! schemes are supported, selected by [`SigningScheme`]:
//!
//! - [`query_hmac`]: HMAC-SHA1 over the canonical query string, the
//!   signature appended as a query parameter.
//! - [`tc3`]: the TC3-HMAC-SHA256 chained-derivation scheme.
//!
//! Both schemes consume the same canonical parameter table
//! ([`params::SessionParams`]) and are pure functions of
//! `(credentials, resolved parameters)`: no I/O, no clocks, no randomness.

pub mod params;
pub mod query_hmac;
pub mod tc3;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AsrError;
use self::params::ResolvedParams;

/// Account credentials for the recognition service.
///
/// All three fields are required and validated independently; the secret
/// key is never substituted for the secret id or vice versa. The `Debug`
/// impl redacts everything past a short prefix so credentials can appear in
/// logs without leaking.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub secret_id: String,
    pub secret_key: String,
    pub app_id: String,
}

impl Credentials {
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            app_id: app_id.into(),
        }
    }

    /// Fail with [`AsrError::Configuration`] when any field is empty.
    pub fn validate(&self) -> Result<(), AsrError> {
        if self.secret_id.is_empty() {
            return Err(AsrError::Configuration("SecretId is empty".into()));
        }
        if self.secret_key.is_empty() {
            return Err(AsrError::Configuration("SecretKey is empty".into()));
        }
        if self.app_id.is_empty() {
            return Err(AsrError::Configuration("AppID is empty".into()));
        }
        Ok(())
    }
}

fn redact(value: &str) -> String {
    if value.is_empty() {
        "<empty>".to_string()
    } else {
        let prefix: String = value.chars().take(4).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret_id", &redact(&self.secret_id))
            .field("secret_key", &redact(&self.secret_key))
            .field("app_id", &self.app_id)
            .finish()
    }
}

/// Host and path of the recognition endpoint.
///
/// The default points at the production service; tests override it to reach
/// a loopback server over plain `ws://`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub path_prefix: String,
    pub tls: bool,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "asr.cloud.tencent.com".into(),
            path_prefix: "/asr/v2".into(),
            tls: true,
        }
    }
}

impl Endpoint {
    /// Request path for a given AppID, e.g. `/asr/v2/1000001`.
    pub fn request_uri(&self, app_id: &str) -> String {
        format!("{}/{app_id}", self.path_prefix)
    }

    /// WebSocket URL scheme for this endpoint.
    pub fn ws_scheme(&self) -> &'static str {
        if self.tls { "wss" } else { "ws" }
    }
}

/// Which signing scheme authenticates the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SigningScheme {
    /// HMAC-SHA1 over the canonical query string (query-parameter auth).
    #[default]
    QueryHmacSha1,
    /// TC3-HMAC-SHA256 chained key derivation.
    Tc3HmacSha256,
}

/// Build the authenticated WebSocket URL for one connection attempt.
pub fn signed_url(
    scheme: SigningScheme,
    credentials: &Credentials,
    endpoint: &Endpoint,
    resolved: &ResolvedParams,
) -> Result<String, AsrError> {
    match scheme {
        SigningScheme::QueryHmacSha1 => {
            Ok(query_hmac::sign(credentials, endpoint, resolved)?.url)
        }
        SigningScheme::Tc3HmacSha256 => Ok(tc3::sign(credentials, endpoint, resolved)?.url),
    }
}
