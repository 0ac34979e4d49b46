//! Conversation routing: one worker task per chat.
//!
//! Messages from the same chat are handled strictly in arrival order (a `/create` answer
//! never overtakes the prompt that asked for it), while a long manager call in one chat
//! does not hold up any other chat. Workers exit after sitting idle, so the number of live
//! workers tracks recently active chats rather than every chat ever seen.

use crate::channels::{ChannelHandle, InboundMessage};
use crate::commands::Dispatcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How long a worker waits for its next message before exiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

struct Worker {
    tx: mpsc::UnboundedSender<InboundMessage>,
    handle: JoinHandle<()>,
}

/// Fans inbound messages out to per-conversation workers.
pub struct ConversationRouter {
    dispatcher: Arc<Dispatcher>,
    channel: Arc<dyn ChannelHandle>,
    workers: HashMap<String, Worker>,
    idle_timeout: Duration,
}

impl ConversationRouter {
    pub fn new(dispatcher: Arc<Dispatcher>, channel: Arc<dyn ChannelHandle>) -> Self {
        Self {
            dispatcher,
            channel,
            workers: HashMap::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Number of workers currently tracked (finished ones count until pruned).
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a message on its conversation's worker, starting one if needed.
    pub fn route(&mut self, msg: InboundMessage) {
        let msg = match self.workers.get(&msg.conversation_id) {
            Some(worker) => match worker.tx.send(msg) {
                Ok(()) => return,
                // Worker went idle (or panicked); start a fresh one below.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };
        // The old worker may still be finishing messages queued before it closed.
        let previous = self
            .workers
            .remove(&msg.conversation_id)
            .map(|w| w.handle);
        let conversation_id = msg.conversation_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(msg);
        let handle = tokio::spawn(conversation_worker(
            self.dispatcher.clone(),
            self.channel.clone(),
            rx,
            self.idle_timeout,
            previous,
        ));
        log::debug!("started worker for conversation {}", conversation_id);
        self.workers.insert(conversation_id, Worker { tx, handle });
    }

    /// Drop entries whose worker has exited. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|_, w| !w.handle.is_finished());
        let removed = before - self.workers.len();
        if removed > 0 {
            log::debug!("pruned {} idle conversation worker(s)", removed);
        }
        removed
    }

    /// Route until `inbound_rx` closes, then let every worker drain its queue.
    pub async fn run(mut self, mut inbound_rx: mpsc::Receiver<InboundMessage>) {
        let mut sweep = tokio::time::interval(self.idle_timeout);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = inbound_rx.recv() => match msg {
                    Some(msg) => self.route(msg),
                    None => break,
                },
                _ = sweep.tick() => {
                    self.prune();
                }
            }
        }
        self.shutdown().await;
    }

    /// Close all queues and wait for in-flight messages to finish.
    pub async fn shutdown(self) {
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .into_values()
            .map(|w| {
                drop(w.tx);
                w.handle
            })
            .collect();
        for h in handles {
            let _ = h.await;
        }
    }
}

async fn conversation_worker(
    dispatcher: Arc<Dispatcher>,
    channel: Arc<dyn ChannelHandle>,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    idle_timeout: Duration,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(msg)) => handle_message(&dispatcher, channel.as_ref(), msg).await,
            Ok(None) => return,
            Err(_) => break,
        }
    }
    // Idle: refuse new messages, then finish anything that slipped in before the close.
    rx.close();
    while let Some(msg) = rx.recv().await {
        handle_message(&dispatcher, channel.as_ref(), msg).await;
    }
}

async fn handle_message(dispatcher: &Dispatcher, channel: &dyn ChannelHandle, msg: InboundMessage) {
    let Some(reply) = dispatcher.handle(&msg).await else {
        return;
    };
    if let Err(e) = channel.send_reply(&msg.conversation_id, &reply).await {
        log::warn!("reply to conversation {} failed: {}", msg.conversation_id, e);
    }
}
