//! Ingress contract.
//!
//! Every transport (bot channel, WebSocket, MCP endpoint) reduces to the
//! same shape: a `(conversation_id, user_text)` pair plus a sink the
//! controller pushes replies through. Transports stay thin; the core never
//! learns which one it is serving.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use ward_core::ids::ConversationId;
use ward_core::messages::ChatMessage;

/// One inbound user turn.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// Conversation the turn belongs to.
    pub conversation_id: ConversationId,
    /// Raw user text, mention markup already removed by the transport.
    pub user_text: String,
}

impl TurnRequest {
    /// Convenience constructor.
    #[must_use]
    pub fn new(conversation_id: impl Into<ConversationId>, user_text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_text: user_text.into(),
        }
    }
}

/// Where replies go. Implementations must not block.
pub trait ReplySink: Send + Sync {
    /// Deliver one outbound message.
    fn send(&self, message: &ChatMessage);
}

/// Sink backed by an unbounded channel, for transports that forward
/// replies from an async task.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiving half.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReplySink for ChannelSink {
    fn send(&self, message: &ChatMessage) {
        // A closed receiver means the transport went away mid-turn; the
        // turn still completes and persists.
        let _ = self.tx.send(message.clone());
    }
}

/// Sink that buffers every reply in memory. Used by tests and by
/// request/response transports that flush at end of turn.
#[derive(Default)]
pub struct BufferSink {
    messages: Mutex<Vec<ChatMessage>>,
}

impl BufferSink {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every reply delivered so far.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    /// The last reply, if any.
    #[must_use]
    pub fn last(&self) -> Option<ChatMessage> {
        self.messages.lock().last().cloned()
    }
}

impl ReplySink for BufferSink {
    fn send(&self, message: &ChatMessage) {
        self.messages.lock().push(message.clone());
    }
}
