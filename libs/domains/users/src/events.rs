//! Consumer side of the `user-created` topic.

use async_trait::async_trait;
use chrono::Utc;
use messaging::{HandlerError, MessageHandler};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::error::UserError;
use crate::models::UserPatch;
use crate::repository::UserRepository;

/// Only the fields the handler needs; anything else on the wire is ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserCreatedNotice {
    user_id: i64,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Stamps `last_event_at` on the user named by a `user.created` event.
pub struct UserCreatedHandler<R: UserRepository> {
    repository: Arc<R>,
}

impl<R: UserRepository> UserCreatedHandler<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: UserRepository + 'static> MessageHandler for UserCreatedHandler<R> {
    async fn handle(&self, payload: Value) -> Result<(), HandlerError> {
        let notice: UserCreatedNotice = serde_json::from_value(payload)?;
        info!(
            user_id = notice.user_id,
            event = notice.event.as_deref().unwrap_or("unknown"),
            email = notice.email.as_deref().unwrap_or_default(),
            "User created event received"
        );

        match self
            .repository
            .update_user(notice.user_id, UserPatch::event_seen(Utc::now()))
            .await
        {
            Ok(_) => Ok(()),
            Err(UserError::NotFound(id)) => Err(HandlerError::failed(format!("unknown user {id}"))),
            Err(e) => Err(HandlerError::failed(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "user_created"
    }
}
