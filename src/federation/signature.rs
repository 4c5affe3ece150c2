//! HTTP Signatures for ActivityPub
//!
//! Outbound requests are signed over exactly
//! `(request-target) host date`, in that order:
//!
//! ```text
//! (request-target): post /inbox
//! host: remote.example
//! date: Tue, 07 Jun 2022 20:51:35 GMT
//! ```
//!
//! The body is covered by a separate `Digest` header.

use crate::auth::decode_public_key_pem;
use crate::error::AppError;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Headers covered by outbound signatures
pub const SIGNED_HEADERS: &str = "(request-target) host date";

/// Maximum clock skew accepted on inbound `Date` headers
const MAX_DATE_SKEW_SECONDS: i64 = 300;

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

pub(crate) async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Federation(format!("Failed to resolve host: {}", e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Federation(format!(
                "Refusing to contact private address for {}",
                host
            )));
        }
    }

    if !resolved_any {
        return Err(AppError::Federation(format!("No DNS records for {}", host)));
    }

    Ok(())
}

/// Extract and validate the remote host of an actor URL or key ID URL.
///
/// This rejects non-HTTP(S) URLs and obvious local/private hosts.
pub fn extract_actor_domain(actor_or_key_id: &str) -> Result<String, AppError> {
    let actor_url = actor_or_key_id.split('#').next().unwrap_or(actor_or_key_id);
    let parsed = url::Url::parse(actor_url)
        .map_err(|e| AppError::Validation(format!("Invalid actor URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported actor URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in actor URL".to_string()))?
        .to_ascii_lowercase();

    if is_disallowed_host(&host) {
        return Err(AppError::Federation(format!(
            "Refusing to contact local host {}",
            host
        )));
    }

    Ok(host)
}

/// `Host` header value for a URL: host plus port when it is not the default
pub fn host_header(url: &url::Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Format a timestamp the way the `Date` header expects
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the canonical signing string
///
/// Byte-exact: lowercase method, single `\n` separators, no trailing newline.
pub fn signing_string(method: &str, path: &str, host: &str, date: &str) -> String {
    format!(
        "(request-target): {} {}\nhost: {}\ndate: {}",
        method.to_lowercase(),
        path,
        host,
        date
    )
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 1123)
    pub date: String,
    /// Host header value, port included when explicit
    pub host: String,
}

/// Sign an HTTP request
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `private_key` - Service RSA private key
/// * `key_id` - Full URL to the public key (actor#main-key)
///
/// # Example
/// ```ignore
/// let headers = sign_request(
///     "POST",
///     "https://remote.server/inbox",
///     &private_key,
///     "https://gravity.example/pub/user/alice#main-key",
/// )?;
/// ```
pub fn sign_request(
    method: &str,
    url: &str,
    private_key: &RsaPrivateKey,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    sign_request_at(method, url, private_key, key_id, Utc::now())
}

pub(crate) fn sign_request_at(
    method: &str,
    url: &str,
    private_key: &RsaPrivateKey,
    key_id: &str,
    now: DateTime<Utc>,
) -> Result<SignatureHeaders, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = host_header(&parsed_url)?;
    let path = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };
    let date = http_date(now);

    let to_sign = signing_string(method, &path, &host, &date);

    // RSASSA-PKCS1-v1_5 with SHA-256
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, to_sign.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    let signature_header = format!(
        "keyId=\"{}\",headers=\"{}\",signature=\"{}\",algorithm=\"rsa-sha256\"",
        key_id, SIGNED_HEADERS, signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        host,
    })
}

fn reject(reason: &str) -> AppError {
    tracing::debug!(reason, "Rejected HTTP signature");
    AppError::InvalidSignature
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| reject(&format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| reject(&format!("invalid {} header", name)))
}

/// Verify an inbound HTTP request signature
///
/// # Arguments
/// * `method` - HTTP method
/// * `path` - Request path (with query, if any)
/// * `headers` - All request headers
/// * `body` - Request body; checked against `Digest` when that header is present
/// * `public_key_pem` - Sender's RSA public key in PEM format
///
/// # Errors
/// `AppError::InvalidSignature` for every failure
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: &[u8],
    public_key_pem: &str,
) -> Result<(), AppError> {
    // 1. Parse Signature header
    let parsed = parse_signature_header(header_str(headers, "signature")?)
        .map_err(|_| reject("malformed Signature header"))?;

    // 2. Validate algorithm and required signed headers.
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(reject("unsupported signature algorithm"));
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(reject("required header not signed"));
        }
    }

    // 3. Verify Date is recent.
    let date = DateTime::parse_from_rfc2822(header_str(headers, "date")?)
        .map_err(|_| reject("invalid Date format"))?;
    if (Utc::now().timestamp() - date.timestamp()).abs() > MAX_DATE_SKEW_SECONDS {
        return Err(reject("Date header too old or in future"));
    }

    // 4. Verify Digest when the sender supplied one.
    if headers.contains_key("digest") && header_str(headers, "digest")? != generate_digest(body) {
        return Err(reject("digest mismatch"));
    }

    // 5. Reconstruct signing string from the listed headers.
    let mut signing_parts = Vec::with_capacity(parsed.headers.len());
    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            name => header_str(headers, name)?.to_string(),
        };
        signing_parts.push(format!("{}: {}", header_name, value));
    }
    let signing_string = signing_parts.join("\n");

    // 6. Verify RSA signature.
    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| reject("invalid signature encoding"))?;
    let public_key =
        decode_public_key_pem(public_key_pem).map_err(|_| reject("invalid public key"))?;
    let verifier = VerifyingKey::<Sha256>::new(public_key);
    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| reject("invalid signature format"))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| reject("signature verification failed"))
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",headers="...",signature="...",algorithm="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::Validation("Missing keyId".to_string()))?,
        // Senders that omit it mean rsa-sha256
        algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature
            .ok_or_else(|| AppError::Validation("Missing signature".to_string()))?,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use http::{HeaderMap, HeaderValue};
    use rsa::pkcs8::DecodePrivateKey;

    const ALICE_PRIVATE: &str = include_str!("../../tests/fixtures/alice_private_key.pem");
    const ALICE_PUBLIC: &str = include_str!("../../tests/fixtures/alice_public_key.pem");
    const MALLORY_PUBLIC: &str = include_str!("../../tests/fixtures/mallory_public_key.pem");
    const KEY_ID: &str = "https://gravity.example/pub/user/alice#main-key";

    fn alice_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(ALICE_PRIVATE).unwrap()
    }

    fn signed_headers(url: &str, body: &[u8]) -> (HeaderMap, String) {
        let signed = sign_request("POST", url, &alice_key(), KEY_ID).unwrap();
        let parsed_url = url::Url::parse(url).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(&signed.host).unwrap());
        headers.insert("date", HeaderValue::from_str(&signed.date).unwrap());
        headers.insert(
            "digest",
            HeaderValue::from_str(&generate_digest(body)).unwrap(),
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).unwrap(),
        );

        (headers, parsed_url.path().to_string())
    }

    #[test]
    fn signing_string_is_byte_exact() {
        assert_eq!(
            signing_string("POST", "/inbox", "remote.example", "Tue, 07 Jun 2022 20:51:35 GMT"),
            "(request-target): post /inbox\nhost: remote.example\ndate: Tue, 07 Jun 2022 20:51:35 GMT"
        );
    }

    #[test]
    fn http_date_uses_rfc1123_gmt() {
        let now = Utc.with_ymd_and_hms(2022, 6, 7, 20, 51, 35).unwrap();
        assert_eq!(http_date(now), "Tue, 07 Jun 2022 20:51:35 GMT");
    }

    #[test]
    fn host_header_keeps_explicit_port_only() {
        let with_port = url::Url::parse("http://127.0.0.1:3000/inbox").unwrap();
        assert_eq!(host_header(&with_port).unwrap(), "127.0.0.1:3000");

        let default_port = url::Url::parse("https://remote.example:443/inbox").unwrap();
        assert_eq!(host_header(&default_port).unwrap(), "remote.example");
    }

    #[test]
    fn signature_header_layout() {
        let now = Utc.with_ymd_and_hms(2022, 6, 7, 20, 51, 35).unwrap();
        let signed =
            sign_request_at("POST", "https://remote.example/inbox", &alice_key(), KEY_ID, now)
                .unwrap();

        assert_eq!(signed.date, "Tue, 07 Jun 2022 20:51:35 GMT");
        assert_eq!(signed.host, "remote.example");
        assert!(signed.signature.starts_with(&format!(
            "keyId=\"{}\",headers=\"(request-target) host date\",signature=\"",
            KEY_ID
        )));
        assert!(signed.signature.ends_with("\",algorithm=\"rsa-sha256\""));

        // The signature covers exactly the canonical string
        let parsed = parse_signature_header(&signed.signature).unwrap();
        let public_key = decode_public_key_pem(ALICE_PUBLIC).unwrap();
        let signature =
            Pkcs1v15Signature::try_from(BASE64.decode(parsed.signature).unwrap().as_slice())
                .unwrap();
        let canonical = signing_string("POST", "/inbox", "remote.example", &signed.date);
        assert!(
            VerifyingKey::<Sha256>::new(public_key)
                .verify(canonical.as_bytes(), &signature)
                .is_ok()
        );
    }

    #[test]
    fn digest_matches_known_value() {
        assert_eq!(
            generate_digest(b""),
            "SHA-256=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn verify_signature_accepts_valid_signed_request() {
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = signed_headers("https://remote.example/pub", body);

        let result = verify_signature("POST", &path, &headers, body, ALICE_PUBLIC);
        assert!(result.is_ok(), "valid signature should verify: {result:?}");
    }

    #[test]
    fn verify_signature_rejects_other_key() {
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = signed_headers("https://remote.example/pub", body);

        assert!(matches!(
            verify_signature("POST", &path, &headers, body, MALLORY_PUBLIC),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_signature_rejects_tampered_body() {
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = signed_headers("https://remote.example/pub", body);

        assert!(matches!(
            verify_signature("POST", &path, &headers, br#"{"type":"Delete"}"#, ALICE_PUBLIC),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_signature_rejects_missing_date_header() {
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = signed_headers("https://remote.example/pub", body);
        headers.remove("date");

        assert!(matches!(
            verify_signature("POST", &path, &headers, body, ALICE_PUBLIC),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_signature_rejects_when_date_not_in_signed_headers() {
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = signed_headers("https://remote.example/pub", body);

        let parsed =
            parse_signature_header(headers.get("signature").unwrap().to_str().unwrap()).unwrap();
        let tampered = format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"(request-target) host\",signature=\"{}\"",
            parsed.key_id, parsed.algorithm, parsed.signature
        );
        headers.insert("signature", HeaderValue::from_str(&tampered).unwrap());

        assert!(matches!(
            verify_signature("POST", &path, &headers, body, ALICE_PUBLIC),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn extract_actor_domain_rejects_localhost() {
        assert!(matches!(
            extract_actor_domain("https://localhost/users/alice#main-key"),
            Err(AppError::Federation(_))
        ));
    }

    #[test]
    fn extract_actor_domain_rejects_private_ip() {
        assert!(matches!(
            extract_actor_domain("http://192.168.1.10/users/alice#main-key"),
            Err(AppError::Federation(_))
        ));
    }

    #[test]
    fn extract_actor_domain_accepts_public_host() {
        let domain = extract_actor_domain("https://example.com/users/alice#main-key")
            .expect("public host should be accepted");
        assert_eq!(domain, "example.com");
    }

    #[tokio::test]
    async fn validate_resolved_host_ips_rejects_loopback() {
        assert!(matches!(
            validate_resolved_host_ips("127.0.0.1", 80).await,
            Err(AppError::Federation(_))
        ));
    }

    #[test]
    fn key_id_matches_actor_compares_without_fragment() {
        assert!(key_id_matches_actor(
            "https://remote.example/users/alice#main-key",
            "https://remote.example/users/alice",
        ));
        assert!(!key_id_matches_actor(
            "https://remote.example/users/bob#main-key",
            "https://remote.example/users/alice",
        ));
    }
}
