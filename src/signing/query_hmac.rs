//! Query-string signing (HMAC-SHA1).
//!
//! The sign string is the request host and path followed by the canonical
//! query: `{host}{path}/{app_id}?{sorted-encoded-params}`. Its HMAC-SHA1
//! digest under the secret key is base64- then percent-encoded and appended
//! to the connection URL as the `signature` parameter.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::AsrError;
use crate::signing::params::{ResolvedParams, encode_component};
use crate::signing::{Credentials, Endpoint};

type HmacSha1 = Hmac<Sha1>;

/// A signed connection request.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// The fully assembled WebSocket URL.
    pub url: String,
    /// The exact string the signature was computed over.
    pub sign_string: String,
    /// Percent-encoded base64 HMAC-SHA1 digest.
    pub signature: String,
}

/// Sign one connection attempt.
///
/// Pure: the output depends only on the credentials and the resolved
/// parameter table.
pub fn sign(
    credentials: &Credentials,
    endpoint: &Endpoint,
    resolved: &ResolvedParams,
) -> Result<SignedRequest, AsrError> {
    credentials.validate()?;

    let uri = endpoint.request_uri(&credentials.app_id);
    let query = resolved.canonical_query(&credentials.secret_id);
    let sign_string = format!("{}{uri}?{query}", endpoint.host);

    let mut mac = HmacSha1::new_from_slice(credentials.secret_key.as_bytes())
        .map_err(|_| AsrError::Configuration("SecretKey rejected by HMAC".into()))?;
    mac.update(sign_string.as_bytes());
    let digest = mac.finalize().into_bytes();
    let signature = encode_component(&BASE64.encode(digest));

    let url = format!(
        "{}://{}{uri}?{query}&signature={signature}",
        endpoint.ws_scheme(),
        endpoint.host
    );

    Ok(SignedRequest {
        url,
        sign_string,
        signature,
    })
}
