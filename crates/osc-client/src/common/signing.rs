//! OSC4-HMAC-SHA256 request signing
//!
//! Outscale signs requests the same way as AWS Signature V4, with an `OSC4`
//! key prefix, an `api` service name and the `X-Osc-Date` header.

use crate::error::OscError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "OSC4-HMAC-SHA256";
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host;x-osc-date";

/// Access key pair used to sign requests
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Headers produced for one signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub osc_date: String,
}

fn hmac(key: &[u8], message: &str) -> Result<Vec<u8>, OscError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| OscError::InvalidRequest(format!("invalid signing key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Sign a POST request to `path` on `host` with the given JSON body
pub fn sign_request(
    credentials: &Credentials,
    region: &str,
    host: &str,
    path: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<SignedHeaders, OscError> {
    let osc_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-osc-date:{}\n",
        CONTENT_TYPE, host, osc_date
    );
    let canonical_request = format!(
        "POST\n{}\n\n{}\n{}\n{}",
        path,
        canonical_headers,
        SIGNED_HEADERS,
        hex::encode(Sha256::digest(body))
    );

    let credential_scope = format!("{}/{}/api/osc4_request", date, region);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        osc_date,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("OSC4{}", credentials.secret_key).as_bytes(), &date)?;
    let k_region = hmac(&k_date, region)?;
    let k_service = hmac(&k_region, "api")?;
    let k_signing = hmac(&k_service, "osc4_request")?;
    let signature = hex::encode(hmac(&k_signing, &string_to_sign)?);

    Ok(SignedHeaders {
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key, credential_scope, SIGNED_HEADERS, signature
        ),
        osc_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signature_matches_reference_vector() {
        let credentials = Credentials {
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "SECRETEXAMPLE".to_string(),
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let headers = sign_request(
            &credentials,
            "eu-west-2",
            "api.eu-west-2.outscale.com",
            "/api/v1/ReadVms",
            b"{}",
            now,
        )
        .unwrap();

        assert_eq!(headers.osc_date, "20240115T103000Z");
        assert_eq!(
            headers.authorization,
            "OSC4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240115/eu-west-2/api/osc4_request, \
             SignedHeaders=content-type;host;x-osc-date, \
             Signature=57a8e05424d88740f404a02493c32ea4fbcc7b3493aa7cd40a7b8925d22d2163"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credentials = Credentials {
            access_key: "AK".to_string(),
            secret_key: "very-secret".to_string(),
        };
        assert!(!format!("{:?}", credentials).contains("very-secret"));
    }
}
