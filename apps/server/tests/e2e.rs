use std::net::SocketAddr;
use std::time::Duration;

use concierge_chats::{ChatStore, ChatType, NewConversation};
use concierge_config::AppConfig;
use concierge_gateway::create_router;
use concierge_runtime::BackendServices;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    services: BackendServices,
    conversation_id: i64,
    alice: (i64, String),
    bob: (i64, String),
    outsider: (i64, String),
    server: JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let db_dir = TempDir::new().expect("create temp dir");
        let db_path = db_dir.path().join("concierge-e2e.db");

        let mut config = AppConfig::default();
        config.database.url = format!("sqlite://{}", db_path.to_string_lossy());
        config.database.max_connections = 5;

        let services = BackendServices::initialise(&config)
            .await
            .expect("initialise backend services");

        let auth = &services.authenticator;
        let company = auth.create_company("E2E Hotel").await.unwrap();
        let mut users = Vec::new();
        for name in ["alice", "bob", "outsider"] {
            let user = auth.create_user(company, None, Some(name)).await.unwrap();
            let session = auth.issue_session(user.id).await.unwrap();
            users.push((user.id, session.token));
        }

        let conversation = services
            .store
            .create_conversation(NewConversation {
                company_id: company,
                creator_id: users[0].0,
                chat_type: ChatType::Group,
                title: "Lobby".to_string(),
                description: None,
                members: vec![users[1].0],
            })
            .await
            .unwrap();

        let app = create_router(services.gateway_state(&config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let outsider = users.pop().unwrap();
        let bob = users.pop().unwrap();
        let alice = users.pop().unwrap();

        Self {
            addr,
            services,
            conversation_id: conversation.id,
            alice,
            bob,
            outsider,
            server,
            _db_dir: db_dir,
        }
    }

    /// Open a socket and wait until the hub has admitted it.
    async fn connect(&self, user: &(i64, String)) -> Client {
        let sessions_before = self.services.hub.sessions_for_user(user.0).len();
        let url = format!("ws://{}/ws/connect/?token={}", self.addr, user.1);
        let (client, _response) = connect_async(url).await.expect("socket upgrade");

        timeout(Duration::from_secs(2), async {
            while self.services.hub.sessions_for_user(user.0).len() == sessions_before {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should be registered");

        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .expect("send frame");
}

/// Next envelope of the given type, skipping control frames and other kinds.
async fn next_of_type(client: &mut Client, kind: &str) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            let frame = client
                .next()
                .await
                .expect("socket closed early")
                .expect("socket error");
            let Message::Text(text) = frame else { continue };
            let envelope: Value = serde_json::from_str(&text).expect("server sent JSON");
            if envelope["type"] == kind {
                return envelope;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no '{kind}' envelope arrived"))
}

/// Next envelope of any kind other than presence.
async fn next_envelope(client: &mut Client) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            let frame = client
                .next()
                .await
                .expect("socket closed early")
                .expect("socket error");
            let Message::Text(text) = frame else { continue };
            let envelope: Value = serde_json::from_str(&text).expect("server sent JSON");
            if envelope["type"] != "user_status" {
                return envelope;
            }
        }
    })
    .await
    .expect("no envelope arrived")
}

#[tokio::test(flavor = "multi_thread")]
async fn text_message_is_stored_and_fanned_out_over_real_sockets() {
    let server = TestServer::start().await;
    let mut alice = server.connect(&server.alice).await;
    let mut bob = server.connect(&server.bob).await;

    let online = next_of_type(&mut alice, "user_status").await;
    assert_eq!(online["online_status"]["user_id"], server.bob.0);
    assert_eq!(online["online_status"]["is_online"], true);

    send_json(
        &mut alice,
        json!({
            "conversation_id": server.conversation_id,
            "type": "text",
            "content": "is the pool open?",
            "sender_id": 999
        }),
    )
    .await;

    let received = next_of_type(&mut bob, "text").await;
    assert_eq!(received["content"], "is the pool open?");
    assert_eq!(received["sender_id"], server.alice.0);
    let message_id = received["id"].as_i64().expect("server-assigned id");

    let echo = next_of_type(&mut alice, "text").await;
    assert_eq!(echo["id"], message_id);

    let stored = server.services.store.get_message(message_id).await.unwrap();
    assert_eq!(stored.sender_id, server.alice.0);
    assert_eq!(stored.conversation_id, server.conversation_id);
    assert_eq!(stored.content, "is the pool open?");
}

#[tokio::test(flavor = "multi_thread")]
async fn typing_skips_the_sender_and_close_announces_offline() {
    let server = TestServer::start().await;
    let mut alice = server.connect(&server.alice).await;
    let mut bob = server.connect(&server.bob).await;

    send_json(
        &mut bob,
        json!({"conversation_id": server.conversation_id, "type": "typing"}),
    )
    .await;
    send_json(
        &mut bob,
        json!({"conversation_id": server.conversation_id, "type": "text", "content": "one sec"}),
    )
    .await;

    let typing = next_envelope(&mut alice).await;
    assert_eq!(typing["type"], "typing");
    assert_eq!(typing["sender_id"], server.bob.0);

    // Routing is ordered per session, so a typing echo would arrive first.
    let first_for_bob = next_envelope(&mut bob).await;
    assert_eq!(first_for_bob["type"], "text");
    assert_eq!(first_for_bob["content"], "one sec");

    bob.close(None).await.expect("close bob");

    let offline = timeout(Duration::from_secs(2), async {
        loop {
            let envelope = next_of_type(&mut alice, "user_status").await;
            if envelope["online_status"]["is_online"] == false {
                return envelope;
            }
        }
    })
    .await
    .expect("offline presence should arrive");
    assert_eq!(offline["online_status"]["user_id"], server.bob.0);
    assert_eq!(offline["conversation_id"], server.conversation_id);
    assert!(!server.services.hub.is_online(server.bob.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn non_members_are_dropped_without_a_reply() {
    let server = TestServer::start().await;
    let mut alice = server.connect(&server.alice).await;
    let mut outsider = server.connect(&server.outsider).await;

    send_json(
        &mut outsider,
        json!({"conversation_id": server.conversation_id, "type": "text", "content": "let me in"}),
    )
    .await;
    // Frames are handled in order, so this reply proves the text was processed.
    send_json(&mut outsider, json!({"type": "text", "content": "no room"})).await;
    let reply = next_envelope(&mut outsider).await;
    assert_eq!(reply["type"], "error");

    send_json(
        &mut alice,
        json!({"conversation_id": server.conversation_id, "type": "text", "content": "members only"}),
    )
    .await;
    let first = next_of_type(&mut alice, "text").await;
    assert_eq!(first["content"], "members only");

    let stored = server
        .services
        .store
        .list_messages(server.conversation_id, None, 50)
        .await
        .unwrap();
    let contents: Vec<_> = stored.iter().map(|message| message.content.as_str()).collect();
    assert_eq!(contents, vec!["members only"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_without_a_valid_token_is_refused() {
    let server = TestServer::start().await;

    let url = format!("ws://{}/ws/connect/?token=not-a-session", server.addr);
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("upgrade should be refused"),
    }
    assert_eq!(server.services.hub.session_count(), 0);
}
