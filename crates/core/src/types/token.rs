//! Access token introspection.
//!
//! The client never verifies token signatures; it only reads an identifier
//! claim from the payload for log correlation.

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use super::id::TokenId;

/// Errors that can occur when reading claims from a JWT.
#[derive(Debug, Error)]
pub enum TokenClaimsError {
    /// The token does not have three non-empty dot-separated segments.
    #[error("invalid JWT format")]
    InvalidFormat,
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct IdClaims {
    #[serde(default)]
    jti: Option<serde_json::Value>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default, rename = "tokenId")]
    token_id: Option<serde_json::Value>,
}

/// Read the token identifier from a JWT access token.
///
/// The first present claim among `jti`, `id` and `tokenId` wins. Numeric
/// claims are accepted and rendered as strings. Returns `Ok(None)` when the
/// payload carries none of them.
///
/// # Errors
///
/// Returns an error if the token is not a three-part JWT or its payload is
/// not base64url-encoded JSON.
pub fn token_id_from_jwt(token: &str) -> Result<Option<TokenId>, TokenClaimsError> {
    // JWT format: header.payload.signature
    let mut parts = token.split('.');
    let payload_b64 = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => p,
        _ => return Err(TokenClaimsError::InvalidFormat),
    };

    let payload_bytes =
        base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_b64.trim_end_matches('='))?;
    let claims: IdClaims = serde_json::from_slice(&payload_bytes)?;

    Ok([claims.jti, claims.id, claims.token_id]
        .into_iter()
        .flatten()
        .find_map(|value| match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(TokenId::new(s)),
            serde_json::Value::Number(n) => Some(TokenId::new(n.to_string())),
            _ => None,
        }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fake_jwt(payload: &serde_json::Value) -> String {
        let b64 = |b: &[u8]| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b);
        let header = serde_json::json!({ "alg": "none", "typ": "JWT" });
        format!(
            "{}.{}.{}",
            b64(&serde_json::to_vec(&header).unwrap()),
            b64(&serde_json::to_vec(payload).unwrap()),
            b64(b"sig")
        )
    }

    #[test]
    fn test_jti_takes_precedence() {
        let token = fake_jwt(&serde_json::json!({ "jti": "abc", "id": "def" }));
        assert_eq!(token_id_from_jwt(&token).unwrap(), Some(TokenId::new("abc")));
    }

    #[test]
    fn test_falls_back_to_id_then_token_id() {
        let token = fake_jwt(&serde_json::json!({ "id": 7 }));
        assert_eq!(token_id_from_jwt(&token).unwrap(), Some(TokenId::new("7")));

        let token = fake_jwt(&serde_json::json!({ "tokenId": "t-1" }));
        assert_eq!(token_id_from_jwt(&token).unwrap(), Some(TokenId::new("t-1")));
    }

    #[test]
    fn test_no_identifier_claim() {
        let token = fake_jwt(&serde_json::json!({ "sub": "123" }));
        assert_eq!(token_id_from_jwt(&token).unwrap(), None);
    }

    #[test]
    fn test_rejects_opaque_tokens() {
        assert!(matches!(
            token_id_from_jwt("at1"),
            Err(TokenClaimsError::InvalidFormat)
        ));
        assert!(matches!(
            token_id_from_jwt("a.b.c.d"),
            Err(TokenClaimsError::InvalidFormat)
        ));
        assert!(token_id_from_jwt("a.!!!.c").is_err());
    }
}
