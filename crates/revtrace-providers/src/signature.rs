use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Replay window applied to every provider's timestamp scheme
pub const REPLAY_TOLERANCE_SECS: i64 = 300;

fn mac(secret: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret)
        .map_err(|_| Error::Signature("invalid signing secret".to_string()))
}

pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String> {
    let mut mac = mac(secret.as_bytes())?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of a hex-encoded signature against the expected
/// MAC of `message`
pub fn verify_hmac_sha256_hex(secret: &str, message: &str, signature_hex: &str) -> Result<()> {
    let expected = hex::decode(signature_hex)
        .map_err(|_| Error::Signature("signature is not valid hex".to_string()))?;

    let mut mac = mac(secret.as_bytes())?;
    mac.update(message.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| Error::Signature("signature mismatch".to_string()))
}

/// Constant-time equality for shared tokens, via MAC-of-both-sides so the
/// comparison never short-circuits on a prefix
pub fn constant_time_token_eq(expected: &str, presented: &str) -> bool {
    let Ok(mut a) = mac(b"revtrace-token-eq") else {
        return false;
    };
    let Ok(mut b) = mac(b"revtrace-token-eq") else {
        return false;
    };
    a.update(expected.as_bytes());
    b.update(presented.as_bytes());
    a.finalize().into_bytes() == b.finalize().into_bytes()
}

/// Parse `k=v,k=v` signature headers (Stripe's `t=...,v1=...` shape)
pub fn parse_kv_header(header: &str) -> HashMap<&str, &str> {
    header
        .split(',')
        .filter_map(|part| {
            let mut split = part.trim().splitn(2, '=');
            Some((split.next()?, split.next()?))
        })
        .collect()
}

/// Reject timestamps outside the replay window around `received_at`
pub fn check_replay_window(signed_at_unix: i64, received_at: DateTime<Utc>) -> Result<()> {
    let skew = (received_at.timestamp() - signed_at_unix).abs();
    if skew > REPLAY_TOLERANCE_SECS {
        return Err(Error::Signature(format!(
            "timestamp outside replay window: {}s (max {}s)",
            skew, REPLAY_TOLERANCE_SECS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_round_trip() {
        let sig = hmac_sha256_hex("whsec_test", "1700000000.{}").unwrap();
        assert!(verify_hmac_sha256_hex("whsec_test", "1700000000.{}", &sig).is_ok());
        assert!(verify_hmac_sha256_hex("whsec_other", "1700000000.{}", &sig).is_err());
        assert!(verify_hmac_sha256_hex("whsec_test", "1700000001.{}", &sig).is_err());
    }

    #[test]
    fn kv_header_parsing() {
        let parts = parse_kv_header("t=1700000000,v1=abc,v0=def");
        assert_eq!(parts.get("t"), Some(&"1700000000"));
        assert_eq!(parts.get("v1"), Some(&"abc"));
        assert_eq!(parts.get("v0"), Some(&"def"));
    }

    #[test]
    fn replay_window_boundaries() {
        let now = Utc::now();
        assert!(check_replay_window(now.timestamp(), now).is_ok());
        assert!(check_replay_window(now.timestamp() - 299, now).is_ok());
        assert!(check_replay_window(now.timestamp() - 301, now).is_err());
        assert!(check_replay_window(now.timestamp() + 301, now).is_err());
    }

    #[test]
    fn token_eq() {
        assert!(constant_time_token_eq("secret-token", "secret-token"));
        assert!(!constant_time_token_eq("secret-token", "secret-toke"));
        assert!(!constant_time_token_eq("secret-token", ""));
    }
}
