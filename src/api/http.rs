//! HTTP implementation of [`ChatApi`] using `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::auth::CredentialStore;
use crate::chat::{ChatMessage, ChatRoom, MessagePage, RoomId};
use crate::error::ApiError;

use super::ChatApi;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpChatApi {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join replaces the last segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("chat-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.base_url.join(path)?;
        debug!(%method, path, "Chat API request");

        let mut request = self.client.request(method, url);
        if let Some(token) = self.credentials.token() {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body).unwrap_or(body);
        warn!(status = status.as_u16(), detail = %detail, "Chat API request rejected");
        Err(ApiError::Status { status, detail })
    }
}

/// Pull the `detail` field out of an error body, if it has one
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn send_message(&self, room_id: RoomId, content: &str) -> Result<ChatMessage, ApiError> {
        let response = self
            .request(Method::POST, &format!("chat/rooms/{room_id}/messages"))?
            .json(&json!({ "content": content }))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn get_messages(&self, room_id: RoomId, page: MessagePage) -> Result<Vec<ChatMessage>, ApiError> {
        let response = self
            .request(Method::GET, &format!("chat/rooms/{room_id}/messages"))?
            .query(&[("limit", page.limit), ("offset", page.offset)])
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn list_rooms(&self) -> Result<Vec<ChatRoom>, ApiError> {
        let response = self.request(Method::GET, "chat/rooms")?.send().await?;
        Self::parse(response).await
    }

    async fn create_room(&self, teacher_id: i64) -> Result<ChatRoom, ApiError> {
        let response = self
            .request(Method::POST, "chat/rooms")?
            .json(&json!({ "teacher_id": teacher_id }))
            .send()
            .await?;
        Self::parse(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use reqwest::StatusCode;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message_json(id: i64, content: &str) -> Value {
        json!({
            "id": id,
            "content": content,
            "sender_id": 5,
            "chat_room_id": 7,
            "sent_at": "2024-03-01T10:15:00",
            "is_read": false
        })
    }

    fn api(server: &MockServer, token: Option<&str>) -> HttpChatApi {
        let credentials = Arc::new(StaticCredentials::new(token.map(String::from)));
        HttpChatApi::new(&server.uri(), credentials).unwrap()
    }

    #[tokio::test]
    async fn test_send_message_posts_content_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/rooms/7/messages"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({ "content": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_json(41, "hello")))
            .expect(1)
            .mount(&server)
            .await;

        let message = api(&server, Some("secret")).send_message(7, "hello").await.unwrap();
        assert_eq!(message.id, 41);
        assert_eq!(message.chat_room_id, 7);
        assert_eq!(message.content, "hello");
    }

    #[tokio::test]
    async fn test_get_messages_sends_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chat/rooms/7/messages"))
            .and(query_param("limit", "20"))
            .and(query_param("offset", "40"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([message_json(1, "first"), message_json(2, "second")])),
            )
            .mount(&server)
            .await;

        let messages = api(&server, Some("secret"))
            .get_messages(7, MessagePage::new(20, 40))
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "second");
    }

    #[tokio::test]
    async fn test_error_detail_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/rooms/7/messages"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({ "detail": "Not a member of this room" })),
            )
            .mount(&server)
            .await;

        let err = api(&server, Some("secret")).send_message(7, "hi").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        match err {
            ApiError::Status { detail, .. } => assert_eq!(detail, "Not a member of this room"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chat/rooms"))
            .respond_with(ResponseTemplate::new(401).set_body_string("missing token"))
            .mount(&server)
            .await;

        let err = api(&server, None).list_rooms().await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_create_room() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/rooms"))
            .and(body_json(json!({ "teacher_id": 3 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 12,
                "student_id": 5,
                "teacher_id": 3,
                "name": "Student - Teacher",
                "created_at": "2024-03-01T09:00:00Z"
            })))
            .mount(&server)
            .await;

        let room = api(&server, Some("secret")).create_room(3).await.unwrap();
        assert_eq!(room.id, 12);
        assert_eq!(room.teacher_id, 3);
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let credentials = Arc::new(StaticCredentials::new(None));
        let api = HttpChatApi::new("http://localhost:9000/api", credentials).unwrap();
        assert_eq!(
            api.base_url().join("chat/rooms").unwrap().as_str(),
            "http://localhost:9000/api/chat/rooms"
        );
    }

    #[test]
    fn test_error_detail_parsing() {
        assert_eq!(error_detail(r#"{"detail":"nope"}"#).as_deref(), Some("nope"));
        assert_eq!(error_detail("plain text"), None);
    }
}
