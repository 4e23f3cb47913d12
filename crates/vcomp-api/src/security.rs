//! Webhook signatures and callback URL screening.

use std::net::IpAddr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::{Host, Url};

/// Header carrying the stage-1 webhook signature.
pub const SIGNATURE_HEADER: &str = "x-vcomp-signature";

/// Maximum callback URL length.
const MAX_URL_LENGTH: usize = 2048;

type HmacSha256 = Hmac<Sha256>;

/// Sign a webhook body: base64url (no padding) HMAC-SHA256.
pub fn sign_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Check a webhook signature in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = URL_SAFE_NO_PAD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Validate a caller-supplied callback URL.
///
/// Only http(s) is accepted. When `allow_private` is false, loopback,
/// private, link-local and metadata hosts are refused so callbacks cannot
/// be aimed at internal services.
pub fn validate_callback_url(raw: &str, allow_private: bool) -> Result<Url, String> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(format!("callback_url exceeds {} characters", MAX_URL_LENGTH));
    }

    let url = Url::parse(raw.trim()).map_err(|e| format!("callback_url is not a valid URL: {}", e))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("callback_url scheme '{}' is not allowed", url.scheme()));
    }

    let host = url.host().ok_or_else(|| "callback_url has no host".to_string())?;
    if !allow_private && is_internal_host(&host) {
        return Err("callback_url targets an internal address".to_string());
    }

    Ok(url)
}

fn is_internal_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".internal")
                || domain.starts_with("metadata.")
        }
        Host::Ipv4(ip) => is_internal_ip(IpAddr::V4(*ip)),
        Host::Ipv6(ip) => is_internal_ip(IpAddr::V6(*ip)),
    }
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
                || v6.to_ipv4_mapped().is_some_and(|v4| is_internal_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_verifies_and_rejects_tampering() {
        let body = br#"{"external_handle":"enc-1","status":"completed"}"#;
        let signature = sign_body("s3cret", body).unwrap();

        assert!(verify_signature("s3cret", body, &signature));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("s3cret", b"{}", &signature));
        assert!(!verify_signature("s3cret", body, "not base64!"));
    }

    #[test]
    fn test_callback_url_screening() {
        assert!(validate_callback_url("https://caller.example.com/hook", false).is_ok());
        assert!(validate_callback_url("ftp://caller.example.com/hook", true).is_err());
        assert!(validate_callback_url("http://127.0.0.1:9000/hook", false).is_err());
        assert!(validate_callback_url("http://10.1.2.3/hook", false).is_err());
        assert!(validate_callback_url("http://169.254.169.254/latest", false).is_err());
        assert!(validate_callback_url("http://[::1]/hook", false).is_err());
        assert!(validate_callback_url("http://metadata.google.internal/", false).is_err());
        assert!(validate_callback_url("http://127.0.0.1:9000/hook", true).is_ok());
    }
}
