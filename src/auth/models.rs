/// Credential records and flow request/response shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::claims::TokenSubject;
use crate::auth::token::TokenPair;

/// Where a request came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub ip_address: Option<String>,
    /// Device descriptor, typically the user agent
    pub user_agent: Option<String>,
}

/// A user as seen by the credential core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: Uuid,
    /// Lowercase-normalized, unique
    pub email: String,
    /// `salt:derived_key_hex`
    pub password_hash: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    /// SHA-256 digest of the outstanding verification token
    pub email_verification_token: Option<String>,
    /// SHA-256 digest of the outstanding reset token
    pub password_reset_token: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub lock_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    /// Network origin and device descriptor of the last successful login
    pub last_login_origin: Option<Origin>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn token_subject(&self) -> TokenSubject {
        TokenSubject {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            email_verified: self.email_verified,
            created_at: self.created_at,
        }
    }
}

/// Partial update of a credential. `None` leaves a field untouched;
/// `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub password_hash: Option<String>,
    pub is_active: Option<bool>,
    pub email_verified: Option<bool>,
    pub email_verification_token: Option<Option<String>>,
    pub password_reset_token: Option<Option<String>>,
    pub password_reset_expires_at: Option<Option<DateTime<Utc>>>,
    pub failed_login_attempts: Option<u32>,
    pub lock_until: Option<Option<DateTime<Utc>>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_origin: Option<Origin>,
}

impl CredentialUpdate {
    /// Reset the failed-attempt counter and drop any lock.
    pub fn clear_lockout() -> Self {
        Self {
            failed_login_attempts: Some(0),
            lock_until: Some(None),
            ..Self::default()
        }
    }

    pub fn apply_to(self, credential: &mut Credential, now: DateTime<Utc>) {
        if let Some(v) = self.password_hash {
            credential.password_hash = v;
        }
        if let Some(v) = self.is_active {
            credential.is_active = v;
        }
        if let Some(v) = self.email_verified {
            credential.email_verified = v;
        }
        if let Some(v) = self.email_verification_token {
            credential.email_verification_token = v;
        }
        if let Some(v) = self.password_reset_token {
            credential.password_reset_token = v;
        }
        if let Some(v) = self.password_reset_expires_at {
            credential.password_reset_expires_at = v;
        }
        if let Some(v) = self.failed_login_attempts {
            credential.failed_login_attempts = v;
        }
        if let Some(v) = self.lock_until {
            credential.lock_until = v;
        }
        if let Some(v) = self.last_login_at {
            credential.last_login_at = Some(v);
        }
        if let Some(v) = self.last_login_origin {
            credential.last_login_origin = Some(v);
        }
        credential.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub credential_id: Uuid,
    /// SHA-256 digest, never the raw token
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(
        credential_id: Uuid,
        token_digest: String,
        expires_at: DateTime<Utc>,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            credential_id,
            token_digest,
            expires_at,
            is_revoked: false,
            revoked_at: None,
            origin,
            created_at: now,
        }
    }

    /// Usable for a refresh at `now` (the owner's active flag is checked separately)
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub credential_id: Uuid,
    /// SHA-256 digest of the access token
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        credential_id: Uuid,
        token_digest: String,
        expires_at: DateTime<Utc>,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            credential_id,
            token_digest,
            expires_at,
            is_active: true,
            origin,
            created_at: now,
            last_activity_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHistoryEntry {
    pub id: Uuid,
    pub credential_id: Uuid,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordHistoryEntry {
    pub fn new(credential_id: Uuid, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            credential_id,
            password_hash,
            created_at: now,
        }
    }
}

/// Registration input, already parsed by the transport layer
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Public view of a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Register/login result
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: Profile,
    pub tokens: TokenPair,
}

/// Generic success message for flows that must not reveal account state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub message: String,
}

impl Acknowledgement {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential() -> Credential {
        let now = Utc::now();
        Credential {
            id: Uuid::new_v4(),
            email: "alice@x.com".to_string(),
            password_hash: "salt:key".to_string(),
            name: Some("Alice".to_string()),
            avatar: None,
            is_active: true,
            email_verified: false,
            email_verification_token: Some("digest".to_string()),
            password_reset_token: None,
            password_reset_expires_at: None,
            failed_login_attempts: 3,
            lock_until: Some(now),
            last_login_at: None,
            last_login_origin: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_update_leaves_untouched_fields() {
        let mut credential = credential();
        let before = credential.clone();
        let later = before.updated_at + Duration::seconds(5);

        CredentialUpdate {
            email_verified: Some(true),
            email_verification_token: Some(None),
            ..CredentialUpdate::default()
        }
        .apply_to(&mut credential, later);

        assert!(credential.email_verified);
        assert_eq!(credential.email_verification_token, None);
        assert_eq!(credential.password_hash, before.password_hash);
        assert_eq!(credential.failed_login_attempts, 3);
        assert_eq!(credential.updated_at, later);
    }

    #[test]
    fn test_clear_lockout() {
        let mut credential = credential();
        CredentialUpdate::clear_lockout().apply_to(&mut credential, Utc::now());

        assert_eq!(credential.failed_login_attempts, 0);
        assert_eq!(credential.lock_until, None);
    }

    #[test]
    fn test_login_update_records_full_origin() {
        let mut credential = credential();
        let origin = Origin {
            ip_address: Some("198.51.100.4".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };
        let now = Utc::now();

        CredentialUpdate {
            last_login_at: Some(now),
            last_login_origin: Some(origin.clone()),
            ..CredentialUpdate::default()
        }
        .apply_to(&mut credential, now);

        assert_eq!(credential.last_login_at, Some(now));
        assert_eq!(credential.last_login_origin, Some(origin));
    }

    #[test]
    fn test_refresh_record_liveness() {
        let now = Utc::now();
        let mut record = RefreshTokenRecord::new(
            Uuid::new_v4(),
            "digest".to_string(),
            now + Duration::days(7),
            Origin::default(),
            now,
        );

        assert!(record.is_live(now));
        assert!(!record.is_live(now + Duration::days(7)));

        record.is_revoked = true;
        assert!(!record.is_live(now));
    }
}
