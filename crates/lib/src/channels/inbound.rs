//! Inbound message from a channel: delivered to the dispatcher one conversation at a time.

/// A text message from an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat the message arrived in; replies go back here.
    pub conversation_id: String,
    /// Sender's numeric id, if the platform supplied a usable one.
    pub sender_id: Option<i64>,
    pub text: String,
}
