use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use crate::{Error, Result};

/// Decoded header and payload of a JWS compact token. The signature segment
/// is retained but not cryptographically verified here; chain validation
/// against Apple's roots is a deploy-time concern of the fronting proxy.
#[derive(Debug, Clone)]
pub struct JwsParts {
    pub header: Value,
    pub payload: Value,
}

pub fn decode_jws(token: &str) -> Result<JwsParts> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::Signature(format!(
            "JWS must have 3 segments, found {}",
            segments.len()
        )));
    }

    let header = decode_segment(segments[0], "header")?;
    let payload = decode_segment(segments[1], "payload")?;
    if segments[2].is_empty() {
        return Err(Error::Signature("JWS signature segment is empty".to_string()));
    }

    Ok(JwsParts { header, payload })
}

fn decode_segment(segment: &str, name: &str) -> Result<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::Signature(format!("JWS {} is not base64url: {}", name, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Signature(format!("JWS {} is not JSON: {}", name, e)))
}

/// Structural checks every App Store token must pass: ES256 algorithm and a
/// certificate chain in the header
pub fn check_es256_header(header: &Value) -> Result<()> {
    let alg = header.get("alg").and_then(Value::as_str);
    if alg != Some("ES256") {
        return Err(Error::Signature(format!(
            "unexpected JWS alg: {:?}",
            alg.unwrap_or("missing")
        )));
    }
    let has_chain = header
        .get("x5c")
        .and_then(Value::as_array)
        .map(|chain| !chain.is_empty())
        .unwrap_or(false);
    if !has_chain {
        return Err(Error::Signature("JWS header missing x5c chain".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_segment(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    fn make_token(header: Value, payload: Value) -> String {
        format!(
            "{}.{}.{}",
            encode_segment(&header),
            encode_segment(&payload),
            URL_SAFE_NO_PAD.encode(b"sig")
        )
    }

    #[test]
    fn decodes_well_formed_token() {
        let token = make_token(
            json!({"alg": "ES256", "x5c": ["cert"]}),
            json!({"notificationType": "DID_RENEW"}),
        );
        let parts = decode_jws(&token).unwrap();
        assert_eq!(parts.payload["notificationType"], "DID_RENEW");
        assert!(check_es256_header(&parts.header).is_ok());
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(decode_jws("onlyone").is_err());
        assert!(decode_jws("a.b").is_err());
    }

    #[test]
    fn rejects_non_es256() {
        let header = json!({"alg": "HS256", "x5c": ["cert"]});
        assert!(check_es256_header(&header).is_err());
    }

    #[test]
    fn rejects_missing_chain() {
        let header = json!({"alg": "ES256"});
        assert!(check_es256_header(&header).is_err());
    }
}
