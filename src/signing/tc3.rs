//! TC3-HMAC-SHA256 signing.
//!
//! Canonical request → SHA-256 hash → string-to-sign → three chained
//! HMAC-SHA256 key derivations (`date`, service, `tc3_request`) → final hex
//! signature. The connection URL carries the canonical query plus
//! `algorithm`, `credential` and `signature` parameters.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::AsrError;
use crate::signing::params::ResolvedParams;
use crate::signing::{Credentials, Endpoint};

type HmacSha256 = Hmac<Sha256>;

/// Algorithm identifier embedded in the string-to-sign and the URL.
pub const ALGORITHM: &str = "TC3-HMAC-SHA256";

/// Service name used in the credential scope and key derivation.
pub const SERVICE: &str = "asr";

/// A signed connection request with the intermediate signing artifacts.
#[derive(Debug, Clone)]
pub struct Tc3Signature {
    /// The fully assembled WebSocket URL.
    pub url: String,
    /// `{secret_id}/{date}/asr/tc3_request`.
    pub credential: String,
    /// The newline-joined canonical request.
    pub canonical_request: String,
    /// The newline-joined string-to-sign.
    pub string_to_sign: String,
    /// Hex-encoded final signature.
    pub signature: String,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, AsrError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| AsrError::Configuration("key rejected by HMAC".into()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// UTC `yyyymmdd` for the credential scope.
fn scope_date(timestamp: u64) -> Result<String, AsrError> {
    let dt = OffsetDateTime::from_unix_timestamp(timestamp as i64)
        .map_err(|_| AsrError::Configuration(format!("timestamp {timestamp} out of range")))?;
    Ok(format!(
        "{:04}{:02}{:02}",
        dt.year(),
        dt.month() as u8,
        dt.day()
    ))
}

/// Sign one connection attempt.
///
/// Pure: the output depends only on the credentials and the resolved
/// parameter table.
pub fn sign(
    credentials: &Credentials,
    endpoint: &Endpoint,
    resolved: &ResolvedParams,
) -> Result<Tc3Signature, AsrError> {
    credentials.validate()?;

    let uri = endpoint.request_uri(&credentials.app_id);
    let query = resolved.canonical_query(&credentials.secret_id);
    let timestamp = resolved.timestamp();
    let date = scope_date(timestamp)?;

    let canonical_request = [
        "GET",
        &uri,
        &query,
        &format!("host:{}\n", endpoint.host),
        "host",
        &sha256_hex(b""),
    ]
    .join("\n");

    let credential_scope = format!("{date}/{SERVICE}/tc3_request");
    let string_to_sign = [
        ALGORITHM,
        &timestamp.to_string(),
        &credential_scope,
        &sha256_hex(canonical_request.as_bytes()),
    ]
    .join("\n");

    let k_date = hmac_sha256(
        format!("TC3{}", credentials.secret_key).as_bytes(),
        date.as_bytes(),
    )?;
    let k_service = hmac_sha256(&k_date, SERVICE.as_bytes())?;
    let k_signing = hmac_sha256(&k_service, b"tc3_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    let credential = format!("{}/{credential_scope}", credentials.secret_id);
    let url = format!(
        "{}://{}{uri}?{query}&algorithm={ALGORITHM}&credential={credential}&signature={signature}",
        endpoint.ws_scheme(),
        endpoint.host
    );

    Ok(Tc3Signature {
        url,
        credential,
        canonical_request,
        string_to_sign,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::params::SessionParams;

    fn fixture() -> (Credentials, Endpoint, ResolvedParams) {
        let credentials = Credentials::new("AKID123", "testkey", "1000001");
        let resolved = SessionParams::default().resolve_with(1_700_000_000, 42, "test-voice-id");
        (credentials, Endpoint::default(), resolved)
    }

    #[test]
    fn scope_date_is_utc() {
        assert_eq!(scope_date(1_700_000_000).unwrap(), "20231114");
        assert_eq!(scope_date(0).unwrap(), "19700101");
    }

    #[test]
    fn canonical_request_shape() {
        let (credentials, endpoint, resolved) = fixture();
        let signed = sign(&credentials, &endpoint, &resolved).unwrap();
        let lines: Vec<&str> = signed.canonical_request.split('\n').collect();
        assert_eq!(lines[0], "GET");
        assert_eq!(lines[1], "/asr/v2/1000001");
        assert!(lines[2].starts_with("convert_num_mode=1&"));
        assert_eq!(lines[3], "host:asr.cloud.tencent.com");
        // The canonical-header block ends with its own newline, producing an
        // empty line before the signed-header list.
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "host");
        assert_eq!(
            lines[6],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn string_to_sign_shape() {
        let (credentials, endpoint, resolved) = fixture();
        let signed = sign(&credentials, &endpoint, &resolved).unwrap();
        let lines: Vec<&str> = signed.string_to_sign.split('\n').collect();
        assert_eq!(lines[0], "TC3-HMAC-SHA256");
        assert_eq!(lines[1], "1700000000");
        assert_eq!(lines[2], "20231114/asr/tc3_request");
        assert_eq!(
            lines[3],
            "0b2c21c1cc32feef651b50bcc09ba7d051299abcc33b1cec09ac1ce81e7f7881"
        );
    }

    #[test]
    fn signature_matches_known_vector() {
        let (credentials, endpoint, resolved) = fixture();
        let signed = sign(&credentials, &endpoint, &resolved).unwrap();
        assert_eq!(
            signed.signature,
            "9770cdba2ac3cf66f389f111d05cf98d9b7ec51a37371afc9a17c84f47ed9534"
        );
        assert_eq!(signed.credential, "AKID123/20231114/asr/tc3_request");
    }

    #[test]
    fn signing_is_deterministic() {
        let (credentials, endpoint, resolved) = fixture();
        let a = sign(&credentials, &endpoint, &resolved).unwrap();
        let b = sign(&credentials, &endpoint, &resolved).unwrap();
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.url, b.url);
    }

    #[test]
    fn url_carries_auth_parameters() {
        let (credentials, endpoint, resolved) = fixture();
        let signed = sign(&credentials, &endpoint, &resolved).unwrap();
        assert!(signed.url.starts_with("wss://asr.cloud.tencent.com/asr/v2/1000001?"));
        assert!(signed.url.contains("&algorithm=TC3-HMAC-SHA256"));
        assert!(
            signed
                .url
                .contains("&credential=AKID123/20231114/asr/tc3_request")
        );
        assert!(signed.url.ends_with(&format!("&signature={}", signed.signature)));
    }

    #[test]
    fn empty_credentials_fail_synchronously() {
        let (_, endpoint, resolved) = fixture();
        let missing_id = Credentials::new("", "testkey", "1000001");
        assert!(matches!(
            sign(&missing_id, &endpoint, &resolved),
            Err(AsrError::Configuration(_))
        ));
    }
}
