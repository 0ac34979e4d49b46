//! Integration test: the Telegram channel against a local stand-in for the Bot API.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wingsbot_lib::channels::{ChannelHandle, TelegramChannel, TELEGRAM_MESSAGE_LIMIT};
use wingsbot_lib::relay::Reply;

const TOKEN: &str = "TEST";
const REVOKED: &str = "REVOKED";

#[derive(Clone, Default)]
struct BotApi {
    sent: Arc<Mutex<Vec<Value>>>,
    offsets: Arc<Mutex<Vec<Option<String>>>>,
}

async fn send_message(State(api): State<BotApi>, Json(body): Json<Value>) -> Json<Value> {
    api.sent.lock().unwrap().push(body);
    Json(json!({ "ok": true, "result": {} }))
}

async fn get_updates(
    State(api): State<BotApi>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let offset = query.get("offset").cloned();
    let first = {
        let mut offsets = api.offsets.lock().unwrap();
        offsets.push(offset);
        offsets.len() == 1
    };
    if first {
        return Json(json!({
            "ok": true,
            "result": [
                { "update_id": 700, "message": { "chat": { "id": 1 }, "from": { "id": 42 }, "text": "/list" } },
                { "update_id": 701, "message": { "chat": { "id": 1 }, "from": { "id": 42 } } }
            ]
        }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    Json(json!({ "ok": true, "result": [] }))
}

async fn get_me() -> Json<Value> {
    Json(json!({ "ok": true, "result": { "id": 1, "is_bot": true, "username": "wings_manager_bot" } }))
}

async fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "ok": false, "error_code": 401, "description": "Unauthorized" })),
    )
}

async fn start_bot_api() -> (String, BotApi) {
    let api = BotApi::default();
    let app = Router::new()
        .route(&format!("/bot{}/sendMessage", TOKEN), post(send_message))
        .route(&format!("/bot{}/getUpdates", TOKEN), get(get_updates))
        .route(&format!("/bot{}/getMe", TOKEN), get(get_me))
        .route(&format!("/bot{}/getMe", REVOKED), get(unauthorized))
        .route(&format!("/bot{}/getUpdates", REVOKED), get(unauthorized))
        .with_state(api.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), api)
}

#[tokio::test]
async fn long_preformatted_reply_is_sent_in_pre_chunks() {
    let (base, api) = start_bot_api().await;
    let channel = TelegramChannel::with_api_base(TOKEN, base);
    let output: Vec<String> = (1..=600).map(|i| format!("container-{:04} <up>", i)).collect();

    channel
        .send_reply("-100", &Reply::Pre(output.join("\n")))
        .await
        .expect("send reply");

    let sent = api.sent.lock().unwrap().clone();
    assert!(sent.len() > 1);
    let mut lines = 0;
    for body in &sent {
        assert_eq!(body["chat_id"], "-100");
        assert_eq!(body["parse_mode"], "HTML");
        let text = body["text"].as_str().unwrap();
        assert!(text.encode_utf16().count() <= TELEGRAM_MESSAGE_LIMIT);
        assert!(text.starts_with("<pre>") && text.ends_with("</pre>"));
        assert!(text.contains("&lt;up&gt;"));
        lines += text.lines().count();
    }
    assert_eq!(lines, 600);
}

#[tokio::test]
async fn plain_reply_is_sent_without_parse_mode() {
    let (base, api) = start_bot_api().await;
    let channel = TelegramChannel::with_api_base(TOKEN, base);
    channel
        .send_reply("5", &Reply::Plain("(done)".to_string()))
        .await
        .expect("send reply");
    let sent = api.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![json!({ "chat_id": "5", "text": "(done)" })]);
}

#[tokio::test]
async fn poll_loop_forwards_text_and_advances_offset() {
    let (base, api) = start_bot_api().await;
    let channel = Arc::new(TelegramChannel::with_api_base(TOKEN, base));
    let (tx, mut rx) = mpsc::channel(8);
    let handle = channel.clone().start_inbound(tx);

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("update forwarded in time")
        .expect("channel open");
    assert_eq!(msg.conversation_id, "1");
    assert_eq!(msg.sender_id, Some(42));
    assert_eq!(msg.text, "/list");

    for _ in 0..100 {
        if api.offsets.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    channel.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poll loop stops")
        .expect("poll task")
        .expect("clean stop");

    let offsets = api.offsets.lock().unwrap().clone();
    assert_eq!(offsets[0], None);
    assert_eq!(offsets[1].as_deref(), Some("702"));
    // The non-text update is consumed without producing a message.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn get_me_returns_the_bot_username() {
    let (base, _api) = start_bot_api().await;
    let channel = TelegramChannel::with_api_base(TOKEN, base.clone());
    assert_eq!(channel.get_me().await.expect("getMe"), "wings_manager_bot");

    let revoked = TelegramChannel::with_api_base(REVOKED, base);
    let err = revoked.get_me().await.unwrap_err();
    assert!(err.is_unauthorized(), "{}", err);
}

#[tokio::test]
async fn poll_loop_stops_when_the_token_is_rejected() {
    let (base, _api) = start_bot_api().await;
    let channel = Arc::new(TelegramChannel::with_api_base(REVOKED, base));
    let (tx, _rx) = mpsc::channel(8);
    let handle = channel.clone().start_inbound(tx);

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop gives up without a stop request")
        .expect("poll task");
    let err = result.unwrap_err();
    assert!(err.is_unauthorized(), "{}", err);
}
