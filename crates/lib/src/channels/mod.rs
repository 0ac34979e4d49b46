//! Communication channels (Telegram).
//!
//! Inbound messages are forwarded to the router; replies are sent back through a
//! [`ChannelHandle`] so the router does not depend on the Bot API directly.

mod inbound;
mod telegram;

pub use inbound::InboundMessage;
pub use telegram::{
    escape_html, render_reply, telegram_api_base, ChannelError, Outgoing, TelegramChannel,
    TelegramUpdate, TELEGRAM_MESSAGE_LIMIT,
};

use crate::relay::Reply;
use async_trait::async_trait;

/// Handle to a running channel (stop, send replies).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a reply to a conversation (e.g. Telegram chat_id).
    async fn send_reply(&self, conversation_id: &str, reply: &Reply) -> Result<(), ChannelError>;
}
