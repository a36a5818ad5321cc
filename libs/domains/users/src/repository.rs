use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{UserError, UserResult};
use crate::models::{CreateUser, User, UserPatch, normalize_email};

/// Repository trait for User persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// All users, oldest first
    async fn find_all(&self) -> UserResult<Vec<User>>;

    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> UserResult<Option<User>>;

    /// Persist a new user and assign its id
    async fn create(&self, input: CreateUser) -> UserResult<User>;

    /// Apply a partial update; `NotFound` if the id is unknown
    async fn update_user(&self, id: i64, patch: UserPatch) -> UserResult<User>;
}

#[derive(Debug, Default)]
struct Store {
    next_id: i64,
    users: BTreeMap<i64, User>,
}

/// In-memory implementation of UserRepository (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserRepository {
    store: Arc<RwLock<Store>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_all(&self) -> UserResult<Vec<User>> {
        let store = self.store.read().await;
        Ok(store.users.values().cloned().collect())
    }

    async fn find_by_email(&self, email: &str) -> UserResult<Option<User>> {
        let email = normalize_email(email);
        let store = self.store.read().await;
        Ok(store.users.values().find(|u| u.email == email).cloned())
    }

    async fn create(&self, input: CreateUser) -> UserResult<User> {
        let input = input.normalized();
        let mut store = self.store.write().await;

        if store.users.values().any(|u| u.email == input.email) {
            return Err(UserError::DuplicateEmail(input.email));
        }

        store.next_id += 1;
        let user = User::new(store.next_id, input);
        store.users.insert(user.id, user.clone());

        tracing::info!(user_id = user.id, email = %user.email, "Created user");
        Ok(user)
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> UserResult<User> {
        let mut store = self.store.write().await;

        if let Some(email) = patch.email.as_deref().map(normalize_email) {
            if store.users.values().any(|u| u.id != id && u.email == email) {
                return Err(UserError::DuplicateEmail(email));
            }
        }

        let user = store.users.get_mut(&id).ok_or(UserError::NotFound(id))?;
        user.apply_patch(patch);
        Ok(user.clone())
    }
}
