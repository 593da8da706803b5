/// Storage collaborators
///
/// Durable storage lives outside this crate. These traits are the contract a
/// backend must honour, including two atomic primitives:
///
/// - `CredentialStore::increment_failed_attempts` must be a single atomic
///   increment so concurrent failures are never under-counted.
/// - `RefreshTokenStore::rotate` must revoke the old record and insert the new
///   one as one unit, guarded by "old record not yet revoked". Of two concurrent
///   rotations of the same record exactly one returns `true`, and a `false`
///   return leaves storage unchanged.
///
/// `memory::InMemoryStore` implements all four traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::{
    Credential, CredentialUpdate, PasswordHistoryEntry, RefreshTokenRecord, SessionRecord,
};
use crate::error::StoreError;

pub mod memory;

pub use memory::InMemoryStore;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Credential>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, StoreError>;

    async fn find_by_email_verification_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Credential>, StoreError>;

    /// Only returns a credential whose reset token has not expired at `now`.
    async fn find_by_password_reset_digest(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError>;

    /// Fails with `StoreError::Conflict` if the email is taken.
    async fn create(&self, credential: Credential) -> Result<Credential, StoreError>;

    async fn update_fields(&self, id: Uuid, update: CredentialUpdate) -> Result<(), StoreError>;

    /// Atomically add one failed attempt and return the new count.
    async fn increment_failed_attempts(&self, id: Uuid) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, record: RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find_by_digest(&self, digest: &str) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Revoke one record. Returns `false` if it was already revoked.
    async fn revoke(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Revoke every live record of a credential and return how many changed.
    async fn revoke_all_for_credential(&self, credential_id: Uuid) -> Result<u64, StoreError>;

    /// Revoke `old_id` and insert `replacement` atomically.
    /// Returns `false`, changing nothing, if `old_id` was already revoked.
    async fn rotate(&self, old_id: Uuid, replacement: RefreshTokenRecord) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: SessionRecord) -> Result<(), StoreError>;

    /// Returns `false` if no active session matched.
    async fn deactivate_by_digest(&self, digest: &str) -> Result<bool, StoreError>;

    async fn deactivate_all_for_credential(&self, credential_id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait PasswordHistoryStore: Send + Sync {
    async fn append(&self, entry: PasswordHistoryEntry) -> Result<(), StoreError>;

    /// Most recent entries first
    async fn recent(
        &self,
        credential_id: Uuid,
        limit: usize,
    ) -> Result<Vec<PasswordHistoryEntry>, StoreError>;
}

/// The storage collaborators a `CredentialService` is built from
#[derive(Clone)]
pub struct AuthStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub password_history: Arc<dyn PasswordHistoryStore>,
}

impl AuthStores {
    /// Back every collaborator with the same in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            credentials: store.clone(),
            refresh_tokens: store.clone(),
            sessions: store.clone(),
            password_history: store,
        }
    }
}
