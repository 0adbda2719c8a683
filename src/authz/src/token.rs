//! Token validation seam
//!
//! Signature verification is delegated to an injected [`TokenValidator`].
//! When signature validation is disabled the runtime falls back to
//! [`UnverifiedTokenDecoder`], which only checks that a token is a
//! well-formed JWT and extracts its claims.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::Principal;

/// Token validation errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// Not a JWT at all
    #[error("token `{name}` is malformed: {reason}")]
    Malformed { name: String, reason: String },

    /// Well-formed but rejected by the validator
    #[error("token `{name}` was rejected: {reason}")]
    Rejected { name: String, reason: String },
}

/// Claims extracted from a validated token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    /// Name the caller gave the token (e.g. `access_token`)
    pub name: String,

    /// Payload claims
    pub claims: Map<String, Value>,
}

impl TokenClaims {
    /// Subject identifying the principal behind the token
    pub fn subject(&self) -> &str {
        ["sub", "client_id", "jti"]
            .iter()
            .find_map(|key| self.claims.get(*key).and_then(Value::as_str))
            .unwrap_or("anonymous")
    }

    /// Principal id used for policy matching, `<token name>:<subject>`
    pub fn principal_id(&self) -> String {
        format!("{}:{}", self.name, self.subject())
    }
}

impl From<TokenClaims> for Principal {
    fn from(token: TokenClaims) -> Self {
        Principal {
            id: token.subject().to_string(),
            principal_type: token.name,
            attributes: token.claims,
        }
    }
}

/// Validates one named bearer token
pub trait TokenValidator: Send + Sync {
    fn validate(&self, name: &str, token: &str) -> Result<TokenClaims, TokenError>;
}

/// Decodes JWT claims without verifying signatures
#[derive(Debug, Default, Clone, Copy)]
pub struct UnverifiedTokenDecoder;

impl UnverifiedTokenDecoder {
    fn decode_segment(name: &str, segment: &str, what: &str) -> Result<Map<String, Value>, TokenError> {
        let malformed = |reason: String| TokenError::Malformed {
            name: name.to_string(),
            reason,
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .map_err(|e| malformed(format!("{} is not base64url: {}", what, e)))?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(malformed(format!("{} is not a JSON object", what))),
            Err(e) => Err(malformed(format!("{} is not JSON: {}", what, e))),
        }
    }
}

impl TokenValidator for UnverifiedTokenDecoder {
    fn validate(&self, name: &str, token: &str) -> Result<TokenClaims, TokenError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        if segments.len() != 3 {
            return Err(TokenError::Malformed {
                name: name.to_string(),
                reason: format!("expected 3 segments, found {}", segments.len()),
            });
        }

        Self::decode_segment(name, segments[0], "header")?;
        let claims = Self::decode_segment(name, segments[1], "payload")?;

        Ok(TokenClaims {
            name: name.to_string(),
            claims,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Build an unsigned JWT carrying `claims`
    pub(crate) fn encode_jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_decode_claims() {
        let token = encode_jwt(&json!({ "sub": "alice", "org_id": "acme" }));
        let claims = UnverifiedTokenDecoder.validate("access_token", &token).unwrap();
        assert_eq!(claims.subject(), "alice");
        assert_eq!(claims.principal_id(), "access_token:alice");
        assert_eq!(claims.claims["org_id"], json!("acme"));

        let principal = Principal::from(claims);
        assert_eq!(principal.principal_id(), "access_token:alice");
        assert_eq!(principal.attributes["org_id"], json!("acme"));
    }

    #[test]
    fn test_subject_fallbacks() {
        let token = encode_jwt(&json!({ "client_id": "svc-1" }));
        let claims = UnverifiedTokenDecoder.validate("access_token", &token).unwrap();
        assert_eq!(claims.subject(), "svc-1");

        let token = encode_jwt(&json!({ "scope": ["openid"] }));
        let claims = UnverifiedTokenDecoder.validate("id_token", &token).unwrap();
        assert_eq!(claims.principal_id(), "id_token:anonymous");
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["not-a-jwt", "a.b", "!!!.@@@.###"] {
            let err = UnverifiedTokenDecoder.validate("access_token", token).unwrap_err();
            assert!(matches!(err, TokenError::Malformed { .. }), "{}", token);
        }

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let array_payload = URL_SAFE_NO_PAD.encode("[1,2,3]");
        let token = format!("{}.{}.", header, array_payload);
        assert!(UnverifiedTokenDecoder.validate("access_token", &token).is_err());
    }
}
