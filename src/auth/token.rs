/// Signed Token Codec
///
/// Compact three-segment tokens:
/// `base64url(header) "." base64url(payload) "." base64url(HMAC-SHA256(secret, header "." payload))`
///
/// Access and refresh tokens are signed with different secrets. Verification
/// only ever reports `TokenInvalid` or `TokenExpired`, so a forger learns
/// nothing about which check failed.
///
/// Also hosts the opaque-token helpers used for email verification and password
/// reset. Those are random, stored only as SHA-256 digests, and never signed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::auth::claims::{TokenPayload, TokenSubject, TokenType};
use crate::configuration::JwtSettings;
use crate::error::AuthError;

const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

type HmacSha256 = Hmac<Sha256>;

/// Access/refresh tokens issued together
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Unix seconds
    pub access_expires_at: i64,
    /// Unix seconds
    pub refresh_expires_at: i64,
}

pub struct TokenCodec {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl TokenCodec {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            access_secret: settings.access_token_secret.as_bytes().to_vec(),
            refresh_secret: settings.refresh_token_secret.as_bytes().to_vec(),
            access_ttl: settings.access_token_expiry,
            refresh_ttl: settings.refresh_token_expiry,
        }
    }

    /// Issue an access/refresh pair for `subject`, both stamped with `now`.
    pub fn issue_pair(&self, subject: &TokenSubject, now: DateTime<Utc>) -> TokenPair {
        let issued_at = now.timestamp();
        let access = TokenPayload::new(subject, TokenType::Access, issued_at, self.access_ttl);
        let refresh = TokenPayload::new(subject, TokenType::Refresh, issued_at, self.refresh_ttl);

        TokenPair {
            access_token: encode(&access, &self.access_secret),
            refresh_token: encode(&refresh, &self.refresh_secret),
            token_type: "Bearer".to_string(),
            access_expires_at: access.exp,
            refresh_expires_at: refresh.exp,
        }
    }

    /// Verify a token with the secret belonging to `expected`.
    pub fn verify(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<TokenPayload, AuthError> {
        let secret = match expected {
            TokenType::Access => &self.access_secret,
            TokenType::Refresh => &self.refresh_secret,
        };
        verify_with_secret(token, secret, expected, now.timestamp())
    }
}

/// Sign a payload into the compact three-segment form.
pub fn encode(payload: &TokenPayload, secret: &[u8]) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(HEADER_JSON);
    // Serialising a struct of strings and integers cannot fail.
    let payload_json = serde_json::to_vec(payload).unwrap_or_default();
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);

    let signing_input = format!("{}.{}", header_b64, payload_b64);
    let signature = signer(secret, &signing_input).finalize().into_bytes();

    format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
}

/// Verify signature, discriminator and expiry of a compact token.
///
/// # Errors
/// - `TokenInvalid` if the token is malformed, forged, or of the wrong type
/// - `TokenExpired` if `now >= exp`
pub fn verify_with_secret(
    token: &str,
    secret: &[u8],
    expected: TokenType,
    now: i64,
) -> Result<TokenPayload, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    let &[header_b64, payload_b64, signature_b64] = segments.as_slice() else {
        return Err(AuthError::TokenInvalid);
    };

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::TokenInvalid)?;

    let signing_input = format!("{}.{}", header_b64, payload_b64);
    // verify_slice compares in constant time
    signer(secret, &signing_input)
        .verify_slice(&signature)
        .map_err(|_| AuthError::TokenInvalid)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::TokenInvalid)?;
    let payload: TokenPayload =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::TokenInvalid)?;

    if payload.token_type != expected {
        return Err(AuthError::TokenInvalid);
    }

    if payload.is_expired_at(now) {
        return Err(AuthError::TokenExpired);
    }

    Ok(payload)
}

fn signer(secret: &[u8], signing_input: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC-SHA-256 accepts keys of any size");
    mac.update(signing_input.as_bytes());
    mac
}

/// One-way SHA-256 digest (hex) of a token, for storage and lookup.
pub fn hash_for_storage(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `length` cryptographically secure random bytes, hex encoded.
pub fn random_opaque_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
