use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use messaging::ProducerClient;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::UserResult;
use crate::models::{CreateUser, User};
use crate::repository::UserRepository;
use crate::service::{CreateOutcome, UsersService};

/// Create the users router; mount it under `/users`.
pub fn router<R, P>(service: UsersService<R, P>) -> Router
where
    R: UserRepository + 'static,
    P: ProducerClient,
{
    let shared_service = Arc::new(service);

    Router::new()
        .route("/", get(list_users::<R, P>).post(create_user::<R, P>))
        .route("/message", post(send_message::<R, P>))
        .with_state(shared_service)
}

#[derive(Debug, Serialize)]
struct AlreadyExistsResponse {
    message: &'static str,
    data: CreateUser,
}

#[derive(Debug, Serialize)]
struct SentResponse {
    status: &'static str,
    topic: &'static str,
}

/// List all users
///
/// GET /users
async fn list_users<R: UserRepository, P: ProducerClient>(
    State(service): State<Arc<UsersService<R, P>>>,
) -> UserResult<Json<Vec<User>>> {
    Ok(Json(service.find_all().await?))
}

/// Create a user and publish `user.created`
///
/// POST /users
async fn create_user<R: UserRepository, P: ProducerClient>(
    State(service): State<Arc<UsersService<R, P>>>,
    Json(input): Json<CreateUser>,
) -> UserResult<Response> {
    let response = match service.create(input).await? {
        CreateOutcome::Created(user) => (StatusCode::CREATED, Json(user)).into_response(),
        CreateOutcome::AlreadyExists(data) => (
            StatusCode::OK,
            Json(AlreadyExistsResponse {
                message: "User already exists",
                data,
            }),
        )
            .into_response(),
    };
    Ok(response)
}

/// Publish the request body as-is
///
/// POST /users/message
async fn send_message<R: UserRepository, P: ProducerClient>(
    State(service): State<Arc<UsersService<R, P>>>,
    Json(payload): Json<Value>,
) -> UserResult<impl IntoResponse> {
    service.send_message(&payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SentResponse {
            status: "sent",
            topic: crate::models::USER_CREATED_TOPIC,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryUserRepository;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use messaging::{InMemoryBroker, Producer, RetryPolicy, TopicProvisioner};
    use serde_json::json;
    use tower::ServiceExt;

    fn app(broker: &InMemoryBroker) -> (Router, Producer<messaging::MemoryProducer>) {
        let producer = Producer::new(
            broker.producer(),
            TopicProvisioner::new(broker.admin_factory()),
            RetryPolicy::default(),
        );
        let service = UsersService::new(InMemoryUserRepository::new(), producer.clone());
        (router(service), producer)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let broker = InMemoryBroker::new();
        let (app, producer) = app(&broker);
        producer.connect().await.unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/", json!({"name": "Ada", "email": "ada@example.com"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["id"], 1);

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let users = body_json(response).await;
        assert_eq!(users.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_create_existing_user_returns_message() {
        let broker = InMemoryBroker::new();
        let (app, producer) = app(&broker);
        producer.connect().await.unwrap();
        let body = json!({"name": "Ada", "email": "ada@example.com"});

        app.clone().oneshot(post_json("/", body.clone())).await.unwrap();
        let response = app.oneshot(post_json("/", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "User already exists");
        assert_eq!(json["data"]["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_invalid_email_is_bad_request() {
        let broker = InMemoryBroker::new();
        let (app, _producer) = app(&broker);

        let response = app
            .oneshot(post_json("/", json!({"name": "Ada", "email": "nope"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_message_publishes_body() {
        let broker = InMemoryBroker::new();
        let (app, producer) = app(&broker);
        producer.connect().await.unwrap();

        let response = app
            .oneshot(post_json("/message", json!({"hello": "world"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            broker.published("user-created"),
            vec![json!({"hello": "world"})]
        );
    }

    #[tokio::test]
    async fn test_send_message_when_disconnected_is_unavailable() {
        let broker = InMemoryBroker::new();
        let (app, _producer) = app(&broker);

        let response = app
            .oneshot(post_json("/message", json!({"hello": "world"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "messaging_unavailable");
    }
}
