//! In-process storage backend.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::{
    Fingerprint, Movie, Permissions, Scope, Token, TokenRecord, User, UserCredentials,
};
use crate::store::{
    CredentialStore, MovieRepository, PermissionStore, StoreError, UserStore, VersionedResource,
    VersionedStore,
};

/// Users, tokens, permissions and movies held in concurrent maps.
///
/// Each map entry is guarded by its shard lock, so a conditional movie
/// update compares and bumps the version without interleaving with another
/// writer of the same record.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<i64, User>,
    /// Lowercased email to user id.
    emails: DashMap<String, i64>,
    password_hashes: DashMap<i64, String>,
    tokens: DashMap<Fingerprint, TokenRecord>,
    permissions: DashMap<i64, Permissions>,
    movies: DashMap<i64, Movie>,
    next_user_id: AtomicI64,
    next_movie_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user without a password, assigning its id and initial version.
    ///
    /// Unlike [`UserStore::register`] this does not enforce email
    /// uniqueness; the latest user seeded with an email owns it.
    pub fn insert_user(&self, user: User) -> User {
        let user = self.store_user(user);
        self.emails.insert(user.email.to_lowercase(), user.id);
        user
    }

    fn store_user(&self, mut user: User) -> User {
        user.id = self.next_user_id.fetch_add(1, Ordering::Relaxed) + 1;
        user.version = 1;
        self.users.insert(user.id, user.clone());
        user
    }

    /// Persist an issued token. Only its fingerprint is kept.
    pub fn insert_token(&self, token: &Token) {
        let record = token.record();
        self.tokens.insert(record.fingerprint, record);
    }

    pub fn add_permissions_for_user<I, S>(&self, user_id: i64, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .entry(user_id)
            .or_default()
            .extend(codes.into_iter().map(Into::into));
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn user_for_token(
        &self,
        scope: Scope,
        fingerprint: &Fingerprint,
    ) -> Result<User, StoreError> {
        let user_id = {
            let record = self.tokens.get(fingerprint).ok_or(StoreError::NotFound)?;
            if record.scope != scope || record.is_expired_at(Utc::now()) {
                return Err(StoreError::NotFound);
            }
            record.user_id
        };

        self.users
            .get(&user_id)
            .map(|u| u.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn save_token(&self, token: &Token) -> Result<(), StoreError> {
        self.insert_token(token);
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<usize, StoreError> {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, record| !(record.scope == scope && record.user_id == user_id));
        Ok(before.saturating_sub(self.tokens.len()))
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        Ok(self
            .permissions
            .get(&user_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn grant(&self, user_id: i64, codes: &[&str]) -> Result<(), StoreError> {
        self.add_permissions_for_user(user_id, codes.iter().copied());
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn register(&self, user: User, password_hash: String) -> Result<User, StoreError> {
        // The email entry stays locked until the user is stored, so two
        // registrations of one address cannot both succeed.
        match self.emails.entry(user.email.to_lowercase()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateEmail),
            Entry::Vacant(slot) => {
                let user = self.store_user(user);
                self.password_hashes.insert(user.id, password_hash);
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn by_email(&self, email: &str) -> Result<UserCredentials, StoreError> {
        let user_id = *self
            .emails
            .get(&email.to_lowercase())
            .ok_or(StoreError::NotFound)?;
        let user = self
            .users
            .get(&user_id)
            .map(|u| u.value().clone())
            .ok_or(StoreError::NotFound)?;
        // Seeded users have no password and cannot log in.
        let password_hash = self
            .password_hashes
            .get(&user_id)
            .map(|h| h.value().clone())
            .ok_or(StoreError::NotFound)?;
        Ok(UserCredentials {
            user,
            password_hash,
        })
    }

    async fn activate(&self, user_id: i64) -> Result<User, StoreError> {
        let mut user = self.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.activated = true;
        user.version += 1;
        Ok(user.clone())
    }
}

#[async_trait]
impl VersionedStore<Movie> for MemoryStore {
    async fn fetch(&self, id: i64) -> Result<Movie, StoreError> {
        self.get(id).await
    }

    async fn update_if_version(&self, movie: &Movie) -> Result<i32, StoreError> {
        // A record deleted since the read matches nothing, same as a stale version.
        let mut stored = self
            .movies
            .get_mut(&movie.id())
            .ok_or(StoreError::EditConflict)?;
        if stored.version() != movie.version() {
            return Err(StoreError::EditConflict);
        }

        let next = stored.version() + 1;
        *stored = Movie {
            created_at: stored.created_at,
            version: next,
            ..movie.clone()
        };
        Ok(next)
    }
}

#[async_trait]
impl MovieRepository for MemoryStore {
    async fn insert(&self, mut movie: Movie) -> Result<Movie, StoreError> {
        movie.id = self.next_movie_id.fetch_add(1, Ordering::Relaxed) + 1;
        movie.created_at = Utc::now();
        movie.version = 1;
        self.movies.insert(movie.id, movie.clone());
        Ok(movie)
    }

    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        if id < 1 {
            return Err(StoreError::NotFound);
        }
        self.movies
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        if id < 1 {
            return Err(StoreError::NotFound);
        }
        self.movies
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Runtime;
    use chrono::Duration;
    use std::sync::Arc;

    fn user(activated: bool) -> User {
        User {
            id: 0,
            created_at: Utc::now(),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            activated,
            version: 0,
        }
    }

    fn movie(title: &str) -> Movie {
        Movie {
            id: 0,
            created_at: Utc::now(),
            title: title.into(),
            year: 1999,
            runtime: Runtime(136),
            genres: vec!["sci-fi".into()],
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_token_lookup() {
        let store = MemoryStore::new();
        let alice = store.insert_user(user(true));
        let token = Token::generate(alice.id, Duration::hours(1), Scope::Authentication);
        store.insert_token(&token);

        let found = store
            .user_for_token(Scope::Authentication, &Fingerprint::of(&token.plaintext))
            .await
            .unwrap();
        assert_eq!(found.id, alice.id);

        // Same token, wrong scope.
        let wrong_scope = store
            .user_for_token(Scope::PasswordReset, &token.fingerprint)
            .await;
        assert_eq!(wrong_scope, Err(StoreError::NotFound));

        let unknown = store
            .user_for_token(Scope::Authentication, &Fingerprint::of("nope"))
            .await;
        assert_eq!(unknown, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_expired_token_is_absent() {
        let store = MemoryStore::new();
        let alice = store.insert_user(user(true));
        let token = Token::generate(alice.id, Duration::seconds(-5), Scope::Authentication);
        store.insert_token(&token);

        let result = store
            .user_for_token(Scope::Authentication, &token.fingerprint)
            .await;
        assert_eq!(result, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_tokens_for_user() {
        let store = MemoryStore::new();
        let alice = store.insert_user(user(true));
        let auth = Token::generate(alice.id, Duration::hours(1), Scope::Authentication);
        let reset = Token::generate(alice.id, Duration::hours(1), Scope::PasswordReset);
        store.insert_token(&auth);
        store.insert_token(&reset);

        assert_eq!(
            store.delete_all_for_user(Scope::Authentication, alice.id).await,
            Ok(1)
        );
        assert_eq!(
            store
                .user_for_token(Scope::Authentication, &auth.fingerprint)
                .await,
            Err(StoreError::NotFound)
        );
        assert!(store
            .user_for_token(Scope::PasswordReset, &reset.fingerprint)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_register_enforces_unique_email() {
        let store = MemoryStore::new();
        let alice = store.register(user(false), "hash".into()).await.unwrap();
        assert_eq!(alice.version, 1);

        let mut shouting = user(false);
        shouting.email = "ALICE@example.com".into();
        assert_eq!(
            store.register(shouting, "hash".into()).await,
            Err(StoreError::DuplicateEmail)
        );

        let found = store.by_email("Alice@Example.com").await.unwrap();
        assert_eq!(found.user.id, alice.id);
        assert_eq!(found.password_hash, "hash");
    }

    #[tokio::test]
    async fn test_seeded_user_cannot_log_in() {
        let store = MemoryStore::new();
        store.insert_user(user(true));
        assert_eq!(
            store.by_email("alice@example.com").await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store.by_email("nobody@example.com").await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn test_activate() {
        let store = MemoryStore::new();
        let alice = store.register(user(false), "hash".into()).await.unwrap();

        let activated = store.activate(alice.id).await.unwrap();
        assert!(activated.activated);
        assert_eq!(activated.version, 2);
        assert_eq!(store.activate(99).await, Err(StoreError::NotFound));

        // The credential store sees the change too.
        let token = Token::generate(alice.id, Duration::hours(1), Scope::Authentication);
        store.save_token(&token).await.unwrap();
        let found = store
            .user_for_token(Scope::Authentication, &token.fingerprint)
            .await
            .unwrap();
        assert!(found.activated);
    }

    #[tokio::test]
    async fn test_permissions() {
        let store = MemoryStore::new();
        let alice = store.insert_user(user(true));
        assert_eq!(store.permissions_for_user(alice.id).await.unwrap(), Permissions::default());

        store.add_permissions_for_user(alice.id, ["movies:read"]);
        store.grant(alice.id, &["movies:write"]).await.unwrap();
        let perms = store.permissions_for_user(alice.id).await.unwrap();
        assert!(perms.includes("movies:read"));
        assert!(perms.includes("movies:write"));
    }

    #[tokio::test]
    async fn test_movie_crud() {
        let store = MemoryStore::new();
        let created = store.insert(movie("The Matrix")).await.unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.version, 1);

        assert_eq!(store.get(created.id).await.unwrap().title, "The Matrix");
        assert_eq!(store.get(0).await, Err(StoreError::NotFound));
        assert_eq!(store.get(-3).await, Err(StoreError::NotFound));

        store.delete(created.id).await.unwrap();
        assert_eq!(store.delete(created.id).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = MemoryStore::new();
        let created = store.insert(movie("Alien")).await.unwrap();

        let mut edit = created.clone();
        edit.title = "Aliens".into();
        assert_eq!(store.update_if_version(&edit).await, Ok(2));

        // Still conditioned on version 1.
        assert_eq!(store.update_if_version(&edit).await, Err(StoreError::EditConflict));

        let stored = store.get(created.id).await.unwrap();
        assert_eq!(stored.title, "Aliens");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_update_after_delete_conflicts() {
        let store = MemoryStore::new();
        let created = store.insert(movie("Heat")).await.unwrap();
        store.delete(created.id).await.unwrap();
        assert_eq!(
            store.update_if_version(&created).await,
            Err(StoreError::EditConflict)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_version_commits_once() {
        let store = Arc::new(MemoryStore::new());
        let created = store.insert(movie("Ran")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let mut edit = created.clone();
            edit.title = format!("Ran #{i}");
            handles.push(tokio::spawn(async move {
                store.update_if_version(&edit).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(version) => {
                    assert_eq!(version, 2);
                    wins += 1;
                }
                Err(e) => assert_eq!(e, StoreError::EditConflict),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.get(created.id).await.unwrap().version, 2);
    }
}
