//! Telegram channel: long-poll getUpdates and sendMessage via Bot API.

use crate::channels::inbound::InboundMessage;
use crate::channels::ChannelHandle;
use crate::relay::Reply;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

/// Maximum length of one sendMessage text, in UTF-16 code units (how Telegram counts).
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const PRE_OPEN: &str = "<pre>";
const PRE_CLOSE: &str = "</pre>";

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("telegram request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{method} failed: {status} {body}")]
    Api {
        method: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{0} returned ok: false")]
    NotOk(&'static str),
}

#[derive(Debug, Deserialize)]
struct GetMeResponse {
    ok: bool,
    #[serde(default)]
    result: Option<BotIdentity>,
}

#[derive(Debug, Deserialize)]
struct BotIdentity {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Sender of a message. The id is kept loosely typed so a malformed value just yields no sender.
#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    #[serde(default)]
    pub id: serde_json::Value,
}

impl TelegramUser {
    fn numeric_id(&self) -> Option<i64> {
        match &self.id {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl TelegramUpdate {
    /// Text messages become inbound messages; everything else (edits, stickers, joins) is skipped.
    pub fn to_inbound(&self) -> Option<InboundMessage> {
        let msg = self.message.as_ref()?;
        let text = msg.text.as_ref()?;
        Some(InboundMessage {
            conversation_id: msg.chat.id.to_string(),
            sender_id: msg.from.as_ref().and_then(TelegramUser::numeric_id),
            text: text.clone(),
        })
    }
}

/// One sendMessage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub text: String,
    pub parse_mode: Option<&'static str>,
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Turn a reply into sendMessage payloads, splitting on line boundaries to stay under the length limit.
/// Preformatted replies are escaped and each chunk gets its own `<pre>` block.
pub fn render_reply(reply: &Reply) -> Vec<Outgoing> {
    match reply {
        Reply::Plain(text) => chunk_lines(text, TELEGRAM_MESSAGE_LIMIT, utf16_len)
            .into_iter()
            .map(|text| Outgoing {
                text,
                parse_mode: None,
            })
            .collect(),
        Reply::Pre(text) => {
            let limit = TELEGRAM_MESSAGE_LIMIT - PRE_OPEN.len() - PRE_CLOSE.len();
            chunk_lines(text, limit, |s| utf16_len(&escape_html(s)))
                .into_iter()
                .map(|chunk| Outgoing {
                    text: format!("{}{}{}", PRE_OPEN, escape_html(&chunk), PRE_CLOSE),
                    parse_mode: Some("HTML"),
                })
                .collect()
        }
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Split `text` into pieces whose `measure` is at most `limit`, preferring line boundaries.
fn chunk_lines(text: &str, limit: usize, measure: impl Fn(&str) -> usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.split('\n') {
        let line_len = measure(line);
        let sep = usize::from(!current.is_empty());
        if current_len + sep + line_len <= limit {
            if sep == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += sep + line_len;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            continue;
        }
        // Single line longer than the limit: split by characters.
        let mut buf = [0u8; 4];
        for ch in line.chars() {
            let w = measure(ch.encode_utf8(&mut buf));
            if current_len + w > limit && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += w;
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: String,
    api_base: String,
    running: AtomicBool,
    stop_signal: Notify,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(token, telegram_api_base())
    }

    /// Channel talking to a custom Bot API endpoint (local Bot API server, tests).
    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            id: "telegram".to_string(),
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Start the getUpdates long-poll loop and forward messages to the router. Returns a handle to await on shutdown;
    /// it resolves to an error when Telegram rejects the token.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<Result<(), ChannelError>> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(run_get_updates_loop(self, inbound_tx))
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let mut query = vec![("timeout", LONG_POLL_TIMEOUT.to_string())];
        if let Some(off) = offset {
            query.push(("offset", off.to_string()));
        }
        let res = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&query)
            .send()
            .await?;
        let res = check_status("getUpdates", res).await?;
        let data: GetUpdatesResponse = res.json().await?;
        if !data.ok {
            return Err(ChannelError::NotOk("getUpdates"));
        }
        let next_offset = data
            .result
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1);
        Ok((data.result, next_offset))
    }

    /// Call getMe and return the bot's username. Fails on an invalid or revoked token.
    pub async fn get_me(&self) -> Result<String, ChannelError> {
        let res = self.client.get(self.method_url("getMe")).send().await?;
        let res = check_status("getMe", res).await?;
        let data: GetMeResponse = res.json().await?;
        if !data.ok {
            return Err(ChannelError::NotOk("getMe"));
        }
        data.result
            .and_then(|bot| bot.username)
            .ok_or(ChannelError::NotOk("getMe"))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "url": url, "allowed_updates": ["message"] });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let res = self
            .client
            .post(self.method_url("setWebhook"))
            .json(&body)
            .send()
            .await?;
        check_status("setWebhook", res).await?;
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        let res = self
            .client
            .post(self.method_url("deleteWebhook"))
            .send()
            .await?;
        check_status("deleteWebhook", res).await?;
        Ok(())
    }

    /// Send one text message to a chat via sendMessage API.
    pub async fn send_message(&self, chat_id: &str, out: &Outgoing) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": out.text });
        if let Some(mode) = out.parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.to_string());
        }
        let res = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        check_status("sendMessage", res).await?;
        Ok(())
    }
}

async fn check_status(
    method: &'static str,
    res: reqwest::Response,
) -> Result<reqwest::Response, ChannelError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(ChannelError::Api {
        method,
        status,
        body,
    })
}

impl ChannelError {
    /// Telegram refused the bot token; retrying cannot succeed.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ChannelError::Api { status, .. }
                if *status == reqwest::StatusCode::UNAUTHORIZED || *status == reqwest::StatusCode::NOT_FOUND
        )
    }
}

async fn run_get_updates_loop(
    channel: Arc<TelegramChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> Result<(), ChannelError> {
    let mut offset: Option<i64> = None;
    while channel.running() {
        let polled = tokio::select! {
            polled = channel.get_updates(offset) => polled,
            _ = channel.stop_signal.notified() => break,
        };
        match polled {
            Ok((updates, next)) => {
                offset = next.or(offset);
                for u in updates {
                    let Some(inbound) = u.to_inbound() else {
                        continue;
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return Ok(());
                    }
                }
            }
            Err(e) if e.is_unauthorized() => {
                log::error!("telegram rejected the bot token, stopping getUpdates loop: {}", e);
                return Err(e);
            }
            Err(e) => {
                log::warn!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
    Ok(())
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    async fn send_reply(&self, conversation_id: &str, reply: &Reply) -> Result<(), ChannelError> {
        for out in render_reply(reply) {
            self.send_message(conversation_id, &out).await?;
        }
        Ok(())
    }
}

/// Resolve Telegram bot API base URL (TELEGRAM_API_BASE env, for a local Bot API server).
pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}
