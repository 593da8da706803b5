/// Credential Service
///
/// Register, login, refresh, logout, password reset/change and email
/// verification, coordinated over the injected stores and publisher.
///
/// Every flow reads the clock once and uses that instant throughout, so one
/// flow never straddles an expiry boundary.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::claims::TokenType;
use crate::auth::lockout::{FailureOutcome, LockStatus, LockoutPolicy};
use crate::auth::models::{
    Acknowledgement, AuthSession, Credential, CredentialUpdate, Origin, PasswordHistoryEntry,
    Profile, RefreshTokenRecord, RegisterRequest, SessionRecord,
};
use crate::auth::password::{is_common_password, validate_strength, PasswordHasher, PasswordViolation};
use crate::auth::token::{hash_for_storage, random_opaque_token, TokenCodec, TokenPair};
use crate::clock::{Clock, SystemClock};
use crate::configuration::Settings;
use crate::error::{AuthError, ConfigError, StoreError};
use crate::events::{AuthEvent, EventPublisher};
use crate::store::AuthStores;
use crate::validators::{normalize_email, parse_email};

/// Bytes of entropy in verification and reset tokens
const OPAQUE_TOKEN_BYTES: usize = 32;

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for this email, a password reset link has been sent.";
pub const RESEND_VERIFICATION_MESSAGE: &str =
    "If this email belongs to an unverified account, a verification link has been sent.";

pub struct CredentialService {
    stores: AuthStores,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    hasher: PasswordHasher,
    codec: TokenCodec,
    lockout: LockoutPolicy,
    reset_token_ttl: Duration,
    history_depth: usize,
}

impl CredentialService {
    /// Build the service from validated settings, using the system clock.
    pub fn new(
        settings: &Settings,
        stores: AuthStores,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        Ok(Self {
            stores,
            publisher,
            clock: Arc::new(SystemClock),
            hasher: PasswordHasher::with_iterations(
                &settings.password.pepper,
                settings.password.kdf_iterations,
            ),
            codec: TokenCodec::new(&settings.jwt),
            lockout: LockoutPolicy::from_settings(&settings.lockout),
            reset_token_ttl: Duration::seconds(settings.password.reset_token_expiry),
            history_depth: settings.password.history_depth,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Swap the password hasher, e.g. for a cheaper iteration count in tests.
    pub fn with_password_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Create a credential and sign the new user in.
    ///
    /// # Errors
    /// - `InvalidEmail` if the address is malformed
    /// - `EmailAlreadyRegistered` if the address is taken
    /// - `WeakPassword` listing every violated rule
    pub async fn register(
        &self,
        request: RegisterRequest,
        origin: &Origin,
    ) -> Result<AuthSession, AuthError> {
        let email = parse_email(&request.email)?;

        if self.stores.credentials.find_by_email(&email).await?.is_some() {
            tracing::warn!("Registration attempt for an existing email");
            return Err(AuthError::EmailAlreadyRegistered);
        }

        ensure_acceptable_password(&request.password)?;

        let now = self.clock.now();
        let verification_token = random_opaque_token(OPAQUE_TOKEN_BYTES);

        let credential = Credential {
            id: Uuid::new_v4(),
            email,
            password_hash: self.hasher.hash_password(&request.password),
            name: request.name,
            avatar: request.avatar,
            is_active: true,
            email_verified: false,
            email_verification_token: Some(hash_for_storage(&verification_token)),
            password_reset_token: None,
            password_reset_expires_at: None,
            failed_login_attempts: 0,
            lock_until: None,
            last_login_at: None,
            last_login_origin: None,
            created_at: now,
            updated_at: now,
        };

        let credential = match self.stores.credentials.create(credential).await {
            Ok(credential) => credential,
            // Lost a race with a concurrent registration
            Err(StoreError::Conflict(_)) => return Err(AuthError::EmailAlreadyRegistered),
            Err(e) => return Err(e.into()),
        };

        let tokens = self.codec.issue_pair(&credential.token_subject(), now);
        self.persist_refresh_token(credential.id, &tokens, origin, now).await?;

        self.publish(AuthEvent::UserCreated {
            user_id: credential.id,
            email: credential.email.clone(),
            name: credential.name.clone(),
        });
        self.publish(AuthEvent::SendVerificationEmail {
            user_id: credential.id,
            email: credential.email.clone(),
            name: credential.name.clone(),
            token: verification_token,
        });

        tracing::info!(user_id = %credential.id, "User registered successfully");

        Ok(AuthSession {
            user: credential.profile(),
            tokens,
        })
    }

    /// Authenticate with email and password.
    ///
    /// An unknown email and a wrong password both fail with
    /// `InvalidCredentials`. A wrong password counts towards the lockout
    /// threshold; the failure that reaches it is reported as `AccountLocked`.
    ///
    /// # Errors
    /// - `InvalidCredentials`
    /// - `AccountLocked` while the lock window is active
    /// - `AccountInactive` for deactivated accounts
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        origin: &Origin,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email);
        let now = self.clock.now();

        let Some(credential) = self.stores.credentials.find_by_email(&email).await? else {
            tracing::warn!("Login attempt for unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        match self.lockout.status(credential.lock_until, now) {
            LockStatus::Locked { minutes_remaining, .. } => {
                tracing::warn!(
                    user_id = %credential.id,
                    minutes_remaining,
                    "Login attempt on locked account"
                );
                return Err(AuthError::AccountLocked { minutes_remaining });
            }
            LockStatus::LockExpired => {
                self.stores
                    .credentials
                    .update_fields(credential.id, CredentialUpdate::clear_lockout())
                    .await?;
                tracing::info!(user_id = %credential.id, "Account lock expired");
            }
            LockStatus::Unlocked => {}
        }

        if !credential.is_active {
            tracing::warn!(user_id = %credential.id, "Login attempt on inactive account");
            return Err(AuthError::AccountInactive);
        }

        if !self.hasher.verify_password(password, &credential.password_hash) {
            return Err(self.record_failed_login(credential.id, now).await);
        }

        self.stores
            .credentials
            .update_fields(
                credential.id,
                CredentialUpdate {
                    last_login_at: Some(now),
                    last_login_origin: Some(origin.clone()),
                    ..CredentialUpdate::clear_lockout()
                },
            )
            .await?;

        let tokens = self.codec.issue_pair(&credential.token_subject(), now);
        self.persist_refresh_token(credential.id, &tokens, origin, now).await?;
        self.stores
            .sessions
            .create(SessionRecord::new(
                credential.id,
                hash_for_storage(&tokens.access_token),
                from_unix(tokens.access_expires_at),
                origin.clone(),
                now,
            ))
            .await?;

        self.publish(AuthEvent::UserLoggedIn {
            user_id: credential.id,
            email: credential.email.clone(),
            ip_address: origin.ip_address.clone(),
            user_agent: origin.user_agent.clone(),
            at: now,
        });

        tracing::info!(user_id = %credential.id, "User logged in successfully");

        Ok(AuthSession {
            user: credential.profile(),
            tokens,
        })
    }

    /// Exchange a refresh token for a new pair, revoking the presented one.
    ///
    /// # Errors
    /// - `TokenInvalid` / `TokenExpired` from signature, type or expiry checks
    /// - `TokenRevoked` if the token is unknown, already rotated, or loses a
    ///   concurrent rotation
    /// - `AccountInactive` if the owner has been deactivated
    pub async fn refresh(&self, refresh_token: &str, origin: &Origin) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();

        let payload = self
            .codec
            .verify(refresh_token, TokenType::Refresh, now)
            .map_err(|e| {
                tracing::warn!(error = %e, "Refresh token rejected");
                e
            })?;

        let digest = hash_for_storage(refresh_token);
        let record = match self.stores.refresh_tokens.find_by_digest(&digest).await? {
            Some(record) if !record.is_revoked => record,
            Some(record) => {
                tracing::warn!(
                    user_id = %record.credential_id,
                    "Attempt to use revoked refresh token"
                );
                return Err(AuthError::TokenRevoked);
            }
            None => {
                tracing::warn!(user_id = %payload.sub, "Refresh token not found in storage");
                return Err(AuthError::TokenRevoked);
            }
        };

        if record.credential_id != payload.sub {
            return Err(AuthError::TokenInvalid);
        }
        if !record.is_live(now) {
            return Err(AuthError::TokenExpired);
        }

        let credential = self
            .stores
            .credentials
            .find_by_id(record.credential_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !credential.is_active {
            return Err(AuthError::AccountInactive);
        }

        let tokens = self.codec.issue_pair(&credential.token_subject(), now);
        let replacement = RefreshTokenRecord::new(
            credential.id,
            hash_for_storage(&tokens.refresh_token),
            from_unix(tokens.refresh_expires_at),
            origin.clone(),
            now,
        );

        if !self.stores.refresh_tokens.rotate(record.id, replacement).await? {
            tracing::warn!(
                user_id = %credential.id,
                "Refresh token was rotated by a concurrent request"
            );
            return Err(AuthError::TokenRevoked);
        }

        tracing::info!(user_id = %credential.id, "Token refreshed successfully");
        Ok(tokens)
    }

    /// End the session bound to an access token. Never fails.
    pub async fn logout(&self, access_token: &str) {
        let now = self.clock.now();

        let payload = match self.codec.verify(access_token, TokenType::Access, now) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Logout with unverifiable access token");
                return;
            }
        };

        match self
            .stores
            .sessions
            .deactivate_by_digest(&hash_for_storage(access_token))
            .await
        {
            Ok(true) => tracing::info!(user_id = %payload.sub, "User logged out"),
            Ok(false) => tracing::debug!(user_id = %payload.sub, "No active session to end"),
            Err(e) => tracing::warn!(
                user_id = %payload.sub,
                error = %e,
                "Failed to deactivate session during logout"
            ),
        }
    }

    /// Revoke every refresh token and session of the access token's owner.
    pub async fn logout_all(&self, access_token: &str) -> Result<(), AuthError> {
        let now = self.clock.now();
        let payload = self.codec.verify(access_token, TokenType::Access, now)?;

        let revoked = self
            .stores
            .refresh_tokens
            .revoke_all_for_credential(payload.sub)
            .await?;
        let ended = self
            .stores
            .sessions
            .deactivate_all_for_credential(payload.sub)
            .await?;

        tracing::info!(
            user_id = %payload.sub,
            revoked_tokens = revoked,
            ended_sessions = ended,
            "User logged out everywhere"
        );
        Ok(())
    }

    /// Start a password reset. The response is the same whether or not the
    /// account exists.
    pub async fn forgot_password(&self, email: &str) -> Result<Acknowledgement, AuthError> {
        let email = normalize_email(email);
        let acknowledgement = Acknowledgement::new(FORGOT_PASSWORD_MESSAGE);

        let credential = match self.stores.credentials.find_by_email(&email).await? {
            Some(credential) if credential.is_active => credential,
            _ => {
                tracing::info!("Password reset requested for unknown or inactive account");
                return Ok(acknowledgement);
            }
        };

        let now = self.clock.now();
        let reset_token = random_opaque_token(OPAQUE_TOKEN_BYTES);

        self.stores
            .credentials
            .update_fields(
                credential.id,
                CredentialUpdate {
                    password_reset_token: Some(Some(hash_for_storage(&reset_token))),
                    password_reset_expires_at: Some(Some(now + self.reset_token_ttl)),
                    ..CredentialUpdate::default()
                },
            )
            .await?;

        self.publish(AuthEvent::SendPasswordReset {
            user_id: credential.id,
            email: credential.email.clone(),
            name: credential.name.clone(),
            token: reset_token,
        });

        tracing::info!(user_id = %credential.id, "Password reset requested");
        Ok(acknowledgement)
    }

    /// Set a new password with a reset token and sign the account out everywhere.
    ///
    /// # Errors
    /// - `TokenInvalid` if the token is unknown or expired
    /// - `WeakPassword` / `PasswordReused` for an unacceptable new password
    pub async fn reset_password(&self, reset_token: &str, new_password: &str) -> Result<(), AuthError> {
        let now = self.clock.now();

        let credential = self
            .stores
            .credentials
            .find_by_password_reset_digest(&hash_for_storage(reset_token), now)
            .await?
            .ok_or_else(|| {
                tracing::warn!("Invalid or expired password reset token");
                AuthError::TokenInvalid
            })?;

        ensure_acceptable_password(new_password)?;
        self.ensure_not_reused(&credential, new_password).await?;

        let password_hash = self.hasher.hash_password(new_password);
        self.stores
            .credentials
            .update_fields(
                credential.id,
                CredentialUpdate {
                    password_hash: Some(password_hash.clone()),
                    password_reset_token: Some(None),
                    password_reset_expires_at: Some(None),
                    ..CredentialUpdate::clear_lockout()
                },
            )
            .await?;
        self.stores
            .password_history
            .append(PasswordHistoryEntry::new(credential.id, password_hash, now))
            .await?;

        let revoked = self
            .stores
            .refresh_tokens
            .revoke_all_for_credential(credential.id)
            .await?;
        self.stores
            .sessions
            .deactivate_all_for_credential(credential.id)
            .await?;

        self.publish(AuthEvent::PasswordChanged {
            user_id: credential.id,
            via_reset: true,
        });

        tracing::info!(
            user_id = %credential.id,
            revoked_tokens = revoked,
            "Password reset completed"
        );
        Ok(())
    }

    /// Change the password of the access token's owner. Existing sessions stay valid.
    ///
    /// # Errors
    /// - `TokenInvalid` / `TokenExpired` for the access token
    /// - `UserNotFound` / `AccountInactive` for the owner
    /// - `InvalidCredentials` if `current_password` is wrong
    /// - `WeakPassword` / `PasswordReused` for an unacceptable new password
    pub async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        let credential = self.authenticated_credential(access_token, now).await?;

        if !self
            .hasher
            .verify_password(current_password, &credential.password_hash)
        {
            tracing::warn!(user_id = %credential.id, "Password change with wrong current password");
            return Err(AuthError::InvalidCredentials);
        }

        ensure_acceptable_password(new_password)?;
        self.ensure_not_reused(&credential, new_password).await?;

        let password_hash = self.hasher.hash_password(new_password);
        self.stores
            .credentials
            .update_fields(
                credential.id,
                CredentialUpdate {
                    password_hash: Some(password_hash.clone()),
                    ..CredentialUpdate::default()
                },
            )
            .await?;
        self.stores
            .password_history
            .append(PasswordHistoryEntry::new(credential.id, password_hash, now))
            .await?;

        self.publish(AuthEvent::PasswordChanged {
            user_id: credential.id,
            via_reset: false,
        });

        tracing::info!(user_id = %credential.id, "Password changed");
        Ok(())
    }

    /// Mark the email behind a verification token as verified.
    pub async fn verify_email(&self, verification_token: &str) -> Result<(), AuthError> {
        let credential = self
            .stores
            .credentials
            .find_by_email_verification_digest(&hash_for_storage(verification_token))
            .await?
            .ok_or_else(|| {
                tracing::warn!("Invalid email verification token");
                AuthError::TokenInvalid
            })?;

        self.stores
            .credentials
            .update_fields(
                credential.id,
                CredentialUpdate {
                    email_verified: Some(true),
                    email_verification_token: Some(None),
                    ..CredentialUpdate::default()
                },
            )
            .await?;

        self.publish(AuthEvent::EmailVerified {
            user_id: credential.id,
            email: credential.email.clone(),
        });

        tracing::info!(user_id = %credential.id, "Email verified");
        Ok(())
    }

    /// Issue a fresh verification token. Silent for unknown or verified accounts.
    pub async fn resend_verification(&self, email: &str) -> Result<Acknowledgement, AuthError> {
        let email = normalize_email(email);
        let acknowledgement = Acknowledgement::new(RESEND_VERIFICATION_MESSAGE);

        let credential = match self.stores.credentials.find_by_email(&email).await? {
            Some(credential) if credential.is_active && !credential.email_verified => credential,
            _ => return Ok(acknowledgement),
        };

        let verification_token = random_opaque_token(OPAQUE_TOKEN_BYTES);
        self.stores
            .credentials
            .update_fields(
                credential.id,
                CredentialUpdate {
                    email_verification_token: Some(Some(hash_for_storage(&verification_token))),
                    ..CredentialUpdate::default()
                },
            )
            .await?;

        self.publish(AuthEvent::SendVerificationEmail {
            user_id: credential.id,
            email: credential.email.clone(),
            name: credential.name.clone(),
            token: verification_token,
        });

        tracing::info!(user_id = %credential.id, "Verification email re-sent");
        Ok(acknowledgement)
    }

    /// Profile of the access token's owner
    pub async fn current_user(&self, access_token: &str) -> Result<Profile, AuthError> {
        let now = self.clock.now();
        let credential = self.authenticated_credential(access_token, now).await?;
        Ok(credential.profile())
    }

    /// Deactivate an account and revoke everything it holds.
    pub async fn deactivate(&self, credential_id: Uuid) -> Result<(), AuthError> {
        if self.stores.credentials.find_by_id(credential_id).await?.is_none() {
            return Err(AuthError::UserNotFound);
        }

        self.stores
            .credentials
            .update_fields(
                credential_id,
                CredentialUpdate {
                    is_active: Some(false),
                    ..CredentialUpdate::default()
                },
            )
            .await?;
        let revoked = self
            .stores
            .refresh_tokens
            .revoke_all_for_credential(credential_id)
            .await?;
        self.stores
            .sessions
            .deactivate_all_for_credential(credential_id)
            .await?;

        self.publish(AuthEvent::UserDeactivated {
            user_id: credential_id,
        });

        tracing::info!(user_id = %credential_id, revoked_tokens = revoked, "User deactivated");
        Ok(())
    }

    async fn authenticated_credential(
        &self,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential, AuthError> {
        let payload = self.codec.verify(access_token, TokenType::Access, now)?;

        let credential = self
            .stores
            .credentials
            .find_by_id(payload.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !credential.is_active {
            return Err(AuthError::AccountInactive);
        }
        Ok(credential)
    }

    /// Count a failed password check and turn it into the error to report.
    async fn record_failed_login(&self, credential_id: Uuid, now: DateTime<Utc>) -> AuthError {
        let attempts = match self
            .stores
            .credentials
            .increment_failed_attempts(credential_id)
            .await
        {
            Ok(attempts) => attempts,
            Err(e) => return e.into(),
        };

        match self.lockout.record_failure(attempts, now) {
            FailureOutcome::StillUnlocked { attempts_remaining } => {
                tracing::warn!(
                    user_id = %credential_id,
                    attempts_remaining,
                    "Invalid password"
                );
                AuthError::InvalidCredentials
            }
            FailureOutcome::NowLocked {
                until,
                minutes_remaining,
            } => {
                let update = CredentialUpdate {
                    lock_until: Some(Some(until)),
                    ..CredentialUpdate::default()
                };
                if let Err(e) = self.stores.credentials.update_fields(credential_id, update).await {
                    return e.into();
                }

                self.publish(AuthEvent::AccountLocked {
                    user_id: credential_id,
                    locked_until: until,
                });

                tracing::warn!(
                    user_id = %credential_id,
                    attempts,
                    "Account locked after repeated failed logins"
                );
                AuthError::AccountLocked { minutes_remaining }
            }
        }
    }

    /// Reject a password matching the current one or a recent one, when enabled.
    async fn ensure_not_reused(&self, credential: &Credential, password: &str) -> Result<(), AuthError> {
        if self.history_depth == 0 {
            return Ok(());
        }

        let history = self
            .stores
            .password_history
            .recent(credential.id, self.history_depth)
            .await?;

        let reused = std::iter::once(credential.password_hash.as_str())
            .chain(history.iter().map(|entry| entry.password_hash.as_str()))
            .any(|hash| self.hasher.verify_password(password, hash));

        if reused {
            return Err(AuthError::PasswordReused);
        }
        Ok(())
    }

    async fn persist_refresh_token(
        &self,
        credential_id: Uuid,
        tokens: &TokenPair,
        origin: &Origin,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.stores
            .refresh_tokens
            .create(RefreshTokenRecord::new(
                credential_id,
                hash_for_storage(&tokens.refresh_token),
                from_unix(tokens.refresh_expires_at),
                origin.clone(),
                now,
            ))
            .await?;
        Ok(())
    }

    fn publish(&self, event: AuthEvent) {
        self.publisher.emit(event.name(), event.payload());
    }
}

/// Strength rules plus the common-password list
fn ensure_acceptable_password(password: &str) -> Result<(), AuthError> {
    let mut violations = validate_strength(password).violations;
    if is_common_password(password) {
        violations.push(PasswordViolation::CommonPassword);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(AuthError::WeakPassword(violations))
    }
}

fn from_unix(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptable_password() {
        assert!(ensure_acceptable_password("Str0ng!Pass").is_ok());
    }

    #[test]
    fn test_common_password_reported_with_strength_violations() {
        match ensure_acceptable_password("password") {
            Err(AuthError::WeakPassword(violations)) => {
                assert!(violations.contains(&PasswordViolation::CommonPassword));
                assert!(violations.contains(&PasswordViolation::MissingUppercase));
            }
            other => panic!("Expected WeakPassword, got {:?}", other),
        }
    }

    #[test]
    fn test_common_password_that_passes_strength_rules() {
        match ensure_acceptable_password("P@ssword1") {
            Err(AuthError::WeakPassword(violations)) => {
                assert_eq!(violations, vec![PasswordViolation::CommonPassword]);
            }
            other => panic!("Expected WeakPassword, got {:?}", other),
        }
    }

    #[test]
    fn test_from_unix() {
        assert_eq!(from_unix(0).timestamp(), 0);
        assert_eq!(from_unix(1_700_000_000).timestamp(), 1_700_000_000);
    }
}
