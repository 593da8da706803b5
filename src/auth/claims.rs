/// Signed token payload
///
/// All timestamps are Unix seconds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token discriminator. An access token never verifies as a refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Identity a token pair is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    /// Subject (credential id)
    pub sub: Uuid,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Unique token id
    pub jti: String,
    /// Issued at
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
}

impl TokenPayload {
    pub fn new(subject: &TokenSubject, token_type: TokenType, issued_at: i64, ttl_seconds: i64) -> Self {
        Self {
            sub: subject.id,
            email: subject.email.clone(),
            name: subject.name.clone(),
            avatar: subject.avatar.clone(),
            token_type,
            jti: Uuid::new_v4().simple().to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl_seconds),
        }
    }

    /// Expired at or after `exp`
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            name: None,
            avatar: None,
        }
    }

    #[test]
    fn test_payload_creation() {
        let subject = subject();
        let payload = TokenPayload::new(&subject, TokenType::Access, 1_000, 3600);

        assert_eq!(payload.sub, subject.id);
        assert_eq!(payload.email, subject.email);
        assert_eq!(payload.exp, 4_600);
        assert!(!payload.is_expired_at(4_599));
        assert!(payload.is_expired_at(4_600));
    }

    #[test]
    fn test_type_serialized_as_lowercase() {
        let payload = TokenPayload::new(&subject(), TokenType::Refresh, 0, 10);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["type"], "refresh");
        assert!(json.get("name").is_none());
    }

    #[test]
    fn test_unique_token_ids() {
        let subject = subject();
        let first = TokenPayload::new(&subject, TokenType::Access, 0, 10);
        let second = TokenPayload::new(&subject, TokenType::Access, 0, 10);

        assert_ne!(first.jti, second.jti);
    }

    #[test]
    fn test_oversized_ttl_saturates_instead_of_overflowing() {
        let payload = TokenPayload::new(&subject(), TokenType::Access, 1_700_000_000, i64::MAX);
        assert_eq!(payload.exp, i64::MAX);
        assert!(!payload.is_expired_at(1_700_000_000));
    }
}
