//! Users Domain
//!
//! User registration wired to the messaging layer: every new user is
//! announced on the `user-created` topic, and the same topic is consumed to
//! stamp `last_event_at` on the user.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  ← HTTP endpoints
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐      ┌──────────────────┐
//! │   Service   │ ───► │ messaging        │  ← publish user.created
//! └──────┬──────┘      │ Producer         │
//!        │             └──────────────────┘
//! ┌──────▼──────┐      ┌──────────────────┐
//! │ Repository  │ ◄─── │ UserCreated      │  ← consume user.created
//! └──────┬──────┘      │ Handler          │
//!        │             └──────────────────┘
//! ┌──────▼──────┐
//! │   Models    │  ← Entities, DTOs, events
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_users::{handlers, InMemoryUserRepository, UsersService};
//! use messaging::{InMemoryBroker, Producer, RetryPolicy, TopicProvisioner};
//!
//! let broker = InMemoryBroker::new();
//! let producer = Producer::new(
//!     broker.producer(),
//!     TopicProvisioner::new(broker.admin_factory()),
//!     RetryPolicy::default(),
//! );
//! let service = UsersService::new(InMemoryUserRepository::new(), producer);
//!
//! let router = handlers::router(service);
//! ```

pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use error::{UserError, UserResult};
pub use events::UserCreatedHandler;
pub use models::{
    CreateUser, USER_CREATED_EVENT, USER_CREATED_TOPIC, User, UserCreatedEvent, UserPatch,
};
pub use repository::{InMemoryUserRepository, UserRepository};
pub use service::{CreateOutcome, UsersService};
