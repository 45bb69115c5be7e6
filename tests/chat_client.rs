//! Stream-first sending with HTTP fallback

use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chat_relay::api::HttpChatApi;
use chat_relay::auth::StaticCredentials;
use chat_relay::chat::{ChatClient, Delivery, MessagePage};
use chat_relay::connection_manager::{ConnectionManager, ConnectionState, ManagerConfig};
use chat_relay::error::{ApiError, ChatError};
use chat_relay::websocket::{MemoryServer, MemoryTransport, Outgoing};

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

fn setup(api_server: &MockServer) -> (ChatClient, ConnectionManager, MemoryServer) {
    let (transport, stream_server) = MemoryTransport::pair();
    let credentials = Arc::new(StaticCredentials::new(Some("tok".to_string())));
    let manager = ConnectionManager::start(
        ManagerConfig {
            ws_url: "ws://chat.test".to_string(),
            ..ManagerConfig::default()
        },
        transport,
        credentials.clone(),
    );
    let api = HttpChatApi::new(&api_server.uri(), credentials).unwrap();
    let client = ChatClient::new(manager.clone(), Arc::new(api), 50);
    (client, manager, stream_server)
}

fn room_json(id: i64, teacher_id: i64) -> Value {
    json!({
        "id": id,
        "student_id": 5,
        "teacher_id": teacher_id,
        "name": "Student - Teacher",
        "created_at": "2024-03-01T09:00:00Z"
    })
}

async fn mount_history(api_server: &MockServer, status: u16, body: Value) {
    Mock::given(method("GET"))
        .and(path("/chat/rooms/7/messages"))
        .and(query_param("limit", "50"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(api_server)
        .await;
}

async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    manager
        .state_changes()
        .wait_for(|snapshot| snapshot.state == state)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_open_room_loads_history_then_connects() {
    let api_server = MockServer::start().await;
    mount_history(&api_server, 200, json!([message_json(1, "earlier")])).await;
    let (client, manager, mut stream_server) = setup(&api_server);

    let history = client.open_room(7).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "earlier");

    let peer = stream_server.accept().await.unwrap();
    assert_eq!(peer.room_id(), Some(7));
    wait_for_state(&manager, ConnectionState::Open).await;
    assert_eq!(client.selected_room(), Some(7));
}

#[tokio::test]
async fn test_history_failure_still_connects() {
    let api_server = MockServer::start().await;
    mount_history(&api_server, 500, json!({ "detail": "database unavailable" })).await;
    let (client, _manager, mut stream_server) = setup(&api_server);

    let err = client.open_room(7).await.unwrap_err();
    assert!(matches!(err, ChatError::Api(ApiError::Status { .. })));

    assert!(stream_server.accept().await.is_some());
}

#[tokio::test]
async fn test_send_prefers_stream_and_falls_back_to_http() {
    let api_server = MockServer::start().await;
    mount_history(&api_server, 200, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/chat/rooms/7/messages"))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({ "content": "while offline" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(message_json(2, "while offline")))
        .expect(1)
        .mount(&api_server)
        .await;
    let (client, manager, mut stream_server) = setup(&api_server);

    client.open_room(7).await.unwrap();
    let mut peer = stream_server.accept().await.unwrap();
    wait_for_state(&manager, ConnectionState::Open).await;

    assert_eq!(client.send("  over the stream ").await.unwrap(), Delivery::Streamed);
    match peer.recv().await {
        Some(Outgoing::Text(text)) => {
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value, json!({ "content": "over the stream" }));
        }
        other => panic!("expected chat frame, got {other:?}"),
    }

    peer.close(1000, "server restarting");
    wait_for_state(&manager, ConnectionState::Closed).await;

    match client.send("while offline").await.unwrap() {
        Delivery::Stored(message) => {
            assert_eq!(message.id, 2);
            assert_eq!(message.chat_room_id, 7);
        }
        other => panic!("expected HTTP delivery, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fallback_error_is_returned() {
    let api_server = MockServer::start().await;
    mount_history(&api_server, 200, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/chat/rooms/7/messages"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "detail": "Not a member" })))
        .mount(&api_server)
        .await;
    let (client, manager, mut stream_server) = setup(&api_server);

    client.open_room(7).await.unwrap();
    let peer = stream_server.accept().await.unwrap();
    wait_for_state(&manager, ConnectionState::Open).await;
    peer.close(1000, "bye");
    wait_for_state(&manager, ConnectionState::Closed).await;

    match client.send("hello").await.unwrap_err() {
        ChatError::Api(ApiError::Status { detail, .. }) => assert_eq!(detail, "Not a member"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_send_validation() {
    let api_server = MockServer::start().await;
    mount_history(&api_server, 200, json!([])).await;
    let (client, _manager, _stream_server) = setup(&api_server);

    assert!(matches!(client.send("hello").await, Err(ChatError::NoRoom)));

    client.open_room(7).await.unwrap();
    assert!(matches!(client.send("   ").await, Err(ChatError::EmptyMessage)));

    client.leave();
    assert_eq!(client.selected_room(), None);
    assert!(matches!(client.send("hello").await, Err(ChatError::NoRoom)));
}

#[tokio::test]
async fn test_history_pages_through_selected_room() {
    let api_server = MockServer::start().await;
    mount_history(&api_server, 200, json!([message_json(3, "latest")])).await;
    Mock::given(method("GET"))
        .and(path("/chat/rooms/7/messages"))
        .and(query_param("limit", "50"))
        .and(query_param("offset", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            message_json(1, "oldest"),
            message_json(2, "older")
        ])))
        .expect(1)
        .mount(&api_server)
        .await;
    let (client, _manager, _stream_server) = setup(&api_server);

    let first_page = MessagePage::new(50, 0);
    assert!(matches!(client.history(first_page).await, Err(ChatError::NoRoom)));

    client.open_room(7).await.unwrap();
    let older = client.history(first_page.next()).await.unwrap();
    let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["oldest", "older"]);
}

#[tokio::test]
async fn test_rooms_and_start_room_with() {
    let api_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rooms"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([room_json(7, 3), room_json(8, 4)])))
        .mount(&api_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/rooms"))
        .and(body_json(json!({ "teacher_id": 9 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(room_json(12, 9)))
        .expect(1)
        .mount(&api_server)
        .await;
    let (client, manager, _stream_server) = setup(&api_server);

    let rooms = client.rooms().await.unwrap();
    let ids: Vec<_> = rooms.iter().map(|room| room.id).collect();
    assert_eq!(ids, [7, 8]);

    let room = client.start_room_with(9).await.unwrap();
    assert_eq!(room.id, 12);
    assert_eq!(room.teacher_id, 9);

    // Listing and creating rooms leave the stream alone
    assert_eq!(client.selected_room(), None);
    assert_eq!(manager.state(), ConnectionState::Closed);
}
