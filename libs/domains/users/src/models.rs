use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Topic every new user is announced on
pub const USER_CREATED_TOPIC: &str = "user-created";

/// Value of the `event` field on [`UserCreatedEvent`]
pub const USER_CREATED_EVENT: &str = "user.created";

/// User entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    /// Always stored lower-cased
    pub email: String,
    pub created_at: DateTime<Utc>,
    /// Set when the `user.created` event for this user is consumed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: i64, input: CreateUser) -> Self {
        let input = input.normalized();
        Self {
            id,
            name: input.name,
            email: input.email,
            created_at: Utc::now(),
            last_event_at: None,
        }
    }

    pub fn apply_patch(&mut self, patch: UserPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(email) = patch.email {
            self.email = normalize_email(&email);
        }
        if let Some(at) = patch.last_event_at {
            self.last_event_at = Some(at);
        }
    }
}

/// DTO for creating a new user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
}

impl CreateUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Trimmed name, trimmed lower-case email
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: normalize_email(&self.email),
        }
    }
}

/// Partial update applied by [`crate::UserRepository::update_user`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl UserPatch {
    pub fn event_seen(at: DateTime<Utc>) -> Self {
        Self {
            last_event_at: Some(at),
            ..Self::default()
        }
    }
}

/// Published on [`USER_CREATED_TOPIC`] after a user is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreatedEvent {
    pub event: String,
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&User> for UserCreatedEvent {
    fn from(user: &User) -> Self {
        Self {
            event: USER_CREATED_EVENT.to_string(),
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            timestamp: Utc::now(),
        }
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
