/// In-memory implementation of every storage collaborator.
///
/// Each collection sits behind its own mutex and every trait method takes the
/// lock exactly once, so each call is atomic and no lock outlives a call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::{
    Credential, CredentialUpdate, PasswordHistoryEntry, RefreshTokenRecord, SessionRecord,
};
use crate::error::StoreError;
use crate::store::{CredentialStore, PasswordHistoryStore, RefreshTokenStore, SessionStore};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    credentials: Mutex<HashMap<Uuid, Credential>>,
    refresh_tokens: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
    sessions: Mutex<HashMap<Uuid, SessionRecord>>,
    password_history: Mutex<Vec<PasswordHistoryEntry>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every refresh token record of a credential, revoked ones included
    pub fn refresh_tokens_for(&self, credential_id: Uuid) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let records = lock(&self.refresh_tokens)?;
        Ok(records
            .values()
            .filter(|r| r.credential_id == credential_id)
            .cloned()
            .collect())
    }

    /// Every session record of a credential, inactive ones included
    pub fn sessions_for(&self, credential_id: Uuid) -> Result<Vec<SessionRecord>, StoreError> {
        let sessions = lock(&self.sessions)?;
        Ok(sessions
            .values()
            .filter(|s| s.credential_id == credential_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Credential>, StoreError> {
        let credentials = lock(&self.credentials)?;
        Ok(credentials.values().find(|c| c.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, StoreError> {
        let credentials = lock(&self.credentials)?;
        Ok(credentials.get(&id).cloned())
    }

    async fn find_by_email_verification_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let credentials = lock(&self.credentials)?;
        Ok(credentials
            .values()
            .find(|c| c.email_verification_token.as_deref() == Some(digest))
            .cloned())
    }

    async fn find_by_password_reset_digest(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError> {
        let credentials = lock(&self.credentials)?;
        Ok(credentials
            .values()
            .find(|c| {
                c.password_reset_token.as_deref() == Some(digest)
                    && c.password_reset_expires_at.is_some_and(|expires| expires > now)
            })
            .cloned())
    }

    async fn create(&self, credential: Credential) -> Result<Credential, StoreError> {
        let mut credentials = lock(&self.credentials)?;
        if credentials.values().any(|c| c.email == credential.email) {
            return Err(StoreError::Conflict("email".to_string()));
        }
        credentials.insert(credential.id, credential.clone());
        Ok(credential)
    }

    async fn update_fields(&self, id: Uuid, update: CredentialUpdate) -> Result<(), StoreError> {
        let mut credentials = lock(&self.credentials)?;
        let credential = credentials
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", id)))?;
        update.apply_to(credential, Utc::now());
        Ok(())
    }

    async fn increment_failed_attempts(&self, id: Uuid) -> Result<u32, StoreError> {
        let mut credentials = lock(&self.credentials)?;
        let credential = credentials
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", id)))?;
        credential.failed_login_attempts += 1;
        Ok(credential.failed_login_attempts)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn create(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        let mut records = lock(&self.refresh_tokens)?;
        records.insert(record.id, record);
        Ok(())
    }

    async fn find_by_digest(&self, digest: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let records = lock(&self.refresh_tokens)?;
        Ok(records.values().find(|r| r.token_digest == digest).cloned())
    }

    async fn revoke(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut records = lock(&self.refresh_tokens)?;
        match records.get_mut(&id) {
            Some(record) if !record.is_revoked => {
                record.is_revoked = true;
                record.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_credential(&self, credential_id: Uuid) -> Result<u64, StoreError> {
        let mut records = lock(&self.refresh_tokens)?;
        let now = Utc::now();
        let mut revoked = 0;
        for record in records
            .values_mut()
            .filter(|r| r.credential_id == credential_id && !r.is_revoked)
        {
            record.is_revoked = true;
            record.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn rotate(&self, old_id: Uuid, replacement: RefreshTokenRecord) -> Result<bool, StoreError> {
        let mut records = lock(&self.refresh_tokens)?;
        match records.get_mut(&old_id) {
            Some(old) if !old.is_revoked => {
                old.is_revoked = true;
                old.revoked_at = Some(replacement.created_at);
            }
            _ => return Ok(false),
        }
        records.insert(replacement.id, replacement);
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, session: SessionRecord) -> Result<(), StoreError> {
        let mut sessions = lock(&self.sessions)?;
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn deactivate_by_digest(&self, digest: &str) -> Result<bool, StoreError> {
        let mut sessions = lock(&self.sessions)?;
        match sessions
            .values_mut()
            .find(|s| s.token_digest == digest && s.is_active)
        {
            Some(session) => {
                session.is_active = false;
                session.last_activity_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_all_for_credential(&self, credential_id: Uuid) -> Result<u64, StoreError> {
        let mut sessions = lock(&self.sessions)?;
        let mut deactivated = 0;
        for session in sessions
            .values_mut()
            .filter(|s| s.credential_id == credential_id && s.is_active)
        {
            session.is_active = false;
            deactivated += 1;
        }
        Ok(deactivated)
    }
}

#[async_trait]
impl PasswordHistoryStore for InMemoryStore {
    async fn append(&self, entry: PasswordHistoryEntry) -> Result<(), StoreError> {
        let mut history = lock(&self.password_history)?;
        history.push(entry);
        Ok(())
    }

    async fn recent(
        &self,
        credential_id: Uuid,
        limit: usize,
    ) -> Result<Vec<PasswordHistoryEntry>, StoreError> {
        let history = lock(&self.password_history)?;
        Ok(history
            .iter()
            .rev()
            .filter(|e| e.credential_id == credential_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Origin;
    use chrono::Duration;

    fn credential(email: &str) -> Credential {
        let now = Utc::now();
        Credential {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: "salt:key".to_string(),
            name: None,
            avatar: None,
            is_active: true,
            email_verified: false,
            email_verification_token: None,
            password_reset_token: Some("reset-digest".to_string()),
            password_reset_expires_at: Some(now + Duration::hours(1)),
            failed_login_attempts: 0,
            lock_until: None,
            last_login_at: None,
            last_login_origin: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn refresh_record(credential_id: Uuid, digest: &str) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord::new(
            credential_id,
            digest.to_string(),
            now + Duration::days(7),
            Origin::default(),
            now,
        )
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = InMemoryStore::new();
        CredentialStore::create(&store, credential("alice@x.com")).await.unwrap();

        let result = CredentialStore::create(&store, credential("alice@x.com")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reset_digest_lookup_honours_expiry() {
        let store = InMemoryStore::new();
        let created = CredentialStore::create(&store, credential("alice@x.com")).await.unwrap();
        let now = Utc::now();

        let found = store.find_by_password_reset_digest("reset-digest", now).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(created.id));

        let later = now + Duration::hours(2);
        assert!(store
            .find_by_password_reset_digest("reset-digest", later)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_increment_failed_attempts() {
        let store = InMemoryStore::new();
        let created = CredentialStore::create(&store, credential("alice@x.com")).await.unwrap();

        assert_eq!(store.increment_failed_attempts(created.id).await.unwrap(), 1);
        assert_eq!(store.increment_failed_attempts(created.id).await.unwrap(), 2);
        assert!(matches!(
            store.increment_failed_attempts(Uuid::new_v4()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let original = refresh_record(owner, "old");
        let original_id = original.id;
        RefreshTokenStore::create(&store, original).await.unwrap();

        let first = store.rotate(original_id, refresh_record(owner, "new-1")).await.unwrap();
        let second = store.rotate(original_id, refresh_record(owner, "new-2")).await.unwrap();

        assert!(first);
        assert!(!second);
        // The failed rotation must not leave its replacement behind
        assert!(store.find_by_digest("new-2").await.unwrap().is_none());
        assert!(store.find_by_digest("new-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoke_all_counts_live_records() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let first = refresh_record(owner, "a");
        let first_id = first.id;
        RefreshTokenStore::create(&store, first).await.unwrap();
        RefreshTokenStore::create(&store, refresh_record(owner, "b")).await.unwrap();
        RefreshTokenStore::create(&store, refresh_record(Uuid::new_v4(), "c")).await.unwrap();

        assert!(store.revoke(first_id).await.unwrap());
        assert!(!store.revoke(first_id).await.unwrap());
        assert_eq!(store.revoke_all_for_credential(owner).await.unwrap(), 1);
        assert!(store.refresh_tokens_for(owner).unwrap().iter().all(|r| r.is_revoked));
    }

    #[tokio::test]
    async fn test_password_history_most_recent_first() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        for hash in ["one", "two", "three"] {
            store
                .append(PasswordHistoryEntry::new(owner, hash.to_string(), now))
                .await
                .unwrap();
        }

        let recent = store.recent(owner, 2).await.unwrap();
        let hashes: Vec<&str> = recent.iter().map(|e| e.password_hash.as_str()).collect();
        assert_eq!(hashes, vec!["three", "two"]);
    }
}
