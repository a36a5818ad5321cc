use messaging::{Producer, ProducerClient, ProvisionOutcome, TopicSpec};
use serde_json::Value;
use std::sync::Arc;
use validator::Validate;

use crate::error::UserResult;
use crate::models::{CreateUser, USER_CREATED_TOPIC, User, UserCreatedEvent};
use crate::repository::UserRepository;

/// Result of [`UsersService::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(User),
    /// The email was taken; carries the rejected input back to the caller
    AlreadyExists(CreateUser),
}

/// Service layer for User business logic
pub struct UsersService<R: UserRepository, P: ProducerClient> {
    repository: Arc<R>,
    producer: Producer<P>,
    partitions: u32,
}

impl<R: UserRepository, P: ProducerClient> Clone for UsersService<R, P> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            producer: self.producer.clone(),
            partitions: self.partitions,
        }
    }
}

impl<R: UserRepository, P: ProducerClient> UsersService<R, P> {
    pub fn new(repository: R, producer: Producer<P>) -> Self {
        Self {
            repository: Arc::new(repository),
            producer,
            partitions: 1,
        }
    }

    /// Partition count used when the topic has to be created
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Make sure `user-created` exists. Errors are returned, not logged.
    pub async fn init(&self) -> UserResult<ProvisionOutcome> {
        let topic = TopicSpec::new(USER_CREATED_TOPIC, self.partitions);
        Ok(self.producer.ensure_topic(&topic).await?)
    }

    pub async fn find_all(&self) -> UserResult<Vec<User>> {
        self.repository.find_all().await
    }

    /// Persist the user, then announce it on `user-created`.
    ///
    /// A publish failure is returned to the caller; the user stays persisted.
    pub async fn create(&self, input: CreateUser) -> UserResult<CreateOutcome> {
        input.validate()?;
        let input = input.normalized();

        if self.repository.find_by_email(&input.email).await?.is_some() {
            tracing::info!(email = %input.email, "User already exists");
            return Ok(CreateOutcome::AlreadyExists(input));
        }

        let user = self.repository.create(input).await?;
        self.producer
            .send(USER_CREATED_TOPIC, &UserCreatedEvent::from(&user))
            .await?;

        Ok(CreateOutcome::Created(user))
    }

    /// Publish an arbitrary JSON payload to `user-created`
    pub async fn send_message(&self, payload: &Value) -> UserResult<()> {
        Ok(self.producer.send(USER_CREATED_TOPIC, payload).await?)
    }
}
