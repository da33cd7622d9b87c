// Webhook signature verification (GitHub and Slack schemes)

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Slack rejects requests older than this to blunt replay attacks
const SLACK_TIMESTAMP_TOLERANCE_SECONDS: i64 = 300;

fn hmac_sha256(secret: &str, message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verify a GitHub `X-Hub-Signature-256` header against the raw body
pub fn verify_github_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_signature) else {
        return false;
    };
    constant_time_eq(&hmac_sha256(secret, body), &provided)
}

/// Verify a Slack `X-Slack-Signature` header (v0 scheme) against the raw
/// body and request timestamp
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature_header: &str,
) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (Utc::now().timestamp() - ts).abs() > SLACK_TIMESTAMP_TOLERANCE_SECONDS {
        return false;
    }

    let mut base = Vec::with_capacity(body.len() + timestamp.len() + 4);
    base.extend_from_slice(b"v0:");
    base.extend_from_slice(timestamp.as_bytes());
    base.extend_from_slice(b":");
    base.extend_from_slice(body);

    let expected = format!("v0={}", hex::encode(hmac_sha256(signing_secret, &base)));
    constant_time_eq(expected.as_bytes(), signature_header.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_signature_round_trip() {
        let secret = "webhook-secret";
        let body = br#"{"action":"opened"}"#;
        let header = format!("sha256={}", hex::encode(hmac_sha256(secret, body)));

        assert!(verify_github_signature(secret, body, &header));
        assert!(!verify_github_signature("other-secret", body, &header));
        assert!(!verify_github_signature(secret, b"tampered", &header));
        assert!(!verify_github_signature(secret, body, "sha256=zz"));
        assert!(!verify_github_signature(secret, body, "sha1=abcdef"));
    }

    #[test]
    fn slack_signature_round_trip() {
        let secret = "slack-secret";
        let body = br#"{"type":"event_callback"}"#;
        let timestamp = Utc::now().timestamp().to_string();

        let mut base = format!("v0:{timestamp}:").into_bytes();
        base.extend_from_slice(body);
        let header = format!("v0={}", hex::encode(hmac_sha256(secret, &base)));

        assert!(verify_slack_signature(secret, &timestamp, body, &header));
        assert!(!verify_slack_signature("wrong", &timestamp, body, &header));
        assert!(!verify_slack_signature(secret, &timestamp, b"tampered", &header));
    }

    #[test]
    fn slack_stale_timestamps_are_rejected() {
        let secret = "slack-secret";
        let body = b"{}";
        let stale = (Utc::now().timestamp() - 3600).to_string();

        let mut base = format!("v0:{stale}:").into_bytes();
        base.extend_from_slice(body);
        let header = format!("v0={}", hex::encode(hmac_sha256(secret, &base)));

        assert!(!verify_slack_signature(secret, &stale, body, &header));
        assert!(!verify_slack_signature(secret, "not-a-number", body, &header));
    }
}
