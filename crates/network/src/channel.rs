use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cobalt_log::log_debug;
use cobalt_primitives::error::ErrorCode;
use cobalt_primitives::transaction::Transaction;
use tokio::sync::{mpsc, watch};

use crate::message::{GetBlocks, Headers, Inventory, Message};

/// Unicast, bounded delivery of one subscribed message. A handler that
/// wants the next message subscribes again; this is what makes every
/// subscription in the session edge-triggered.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<T, ErrorCode>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<T, ErrorCode>>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Result<T, ErrorCode> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(ErrorCode::ChannelStopped),
        }
    }
}

struct SubscriptionSlot<T> {
    armed: Mutex<Option<mpsc::Sender<Result<T, ErrorCode>>>>,
}

impl<T> Default for SubscriptionSlot<T> {
    fn default() -> Self {
        Self {
            armed: Mutex::new(None),
        }
    }
}

impl<T> SubscriptionSlot<T> {
    fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(1);
        if let Ok(mut armed) = self.armed.lock() {
            *armed = Some(tx);
        }
        Subscription::new(rx)
    }

    fn deliver(&self, payload: T) -> bool {
        let taken = self.armed.lock().ok().and_then(|mut armed| armed.take());
        match taken {
            Some(sender) => sender.try_send(Ok(payload)).is_ok(),
            None => false,
        }
    }

    fn fail(&self, code: ErrorCode) {
        let taken = self.armed.lock().ok().and_then(|mut armed| armed.take());
        if let Some(sender) = taken {
            let _ = sender.try_send(Err(code));
        }
    }
}

struct ChannelInner {
    authority: String,
    outbound: mpsc::Sender<Message>,
    stopped: AtomicBool,
    stop_signal: watch::Sender<bool>,
    headers: SubscriptionSlot<Headers>,
    inventory: SubscriptionSlot<Inventory>,
    get_blocks: SubscriptionSlot<GetBlocks>,
    transactions: SubscriptionSlot<Transaction>,
}

/// Handle to an established, handshaken peer connection. The fabric owns
/// the transport; handles are clonable and become inert once stopped.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn new(authority: impl Into<String>, outbound: mpsc::Sender<Message>) -> Self {
        let (stop_signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(ChannelInner {
                authority: authority.into(),
                outbound,
                stopped: AtomicBool::new(false),
                stop_signal,
                headers: SubscriptionSlot::default(),
                inventory: SubscriptionSlot::default(),
                get_blocks: SubscriptionSlot::default(),
                transactions: SubscriptionSlot::default(),
            }),
        }
    }

    /// Channel plus the receiving end of its outbound queue; what a
    /// fabric writer task (or a test) drains.
    pub fn pair(authority: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(authority, tx), rx)
    }

    pub fn authority(&self) -> &str {
        &self.inner.authority
    }

    pub fn stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.inner.stop_signal.subscribe()
    }

    pub async fn send(&self, message: Message) -> Result<(), ErrorCode> {
        if self.stopped() {
            return Err(ErrorCode::ChannelStopped);
        }
        self.inner
            .outbound
            .send(message)
            .await
            .map_err(|_| ErrorCode::SendFailed)
    }

    pub fn subscribe_headers(&self) -> Subscription<Headers> {
        self.inner.headers.subscribe()
    }

    pub fn subscribe_inventory(&self) -> Subscription<Inventory> {
        self.inner.inventory.subscribe()
    }

    pub fn subscribe_get_blocks(&self) -> Subscription<GetBlocks> {
        self.inner.get_blocks.subscribe()
    }

    pub fn subscribe_transactions(&self) -> Subscription<Transaction> {
        self.inner.transactions.subscribe()
    }

    /// Routes one inbound message to its armed subscriber. Returns false
    /// when nothing is armed for that kind; the message is dropped, which
    /// is the single-shot contract.
    pub fn deliver(&self, message: Message) -> bool {
        if self.stopped() {
            return false;
        }
        match message {
            Message::Headers(message) => self.inner.headers.deliver(message),
            Message::Inventory(message) => self.inner.inventory.deliver(message),
            Message::GetBlocks(message) => self.inner.get_blocks.deliver(message),
            Message::Transaction(tx) => self.inner.transactions.deliver(tx),
            other => {
                log_debug!(
                    "unroutable {} message on [{}]",
                    other.command(),
                    self.inner.authority
                );
                false
            }
        }
    }

    /// Idempotent. Armed subscribers observe the stop code; later
    /// subscriptions never receive anything.
    pub fn stop(&self, code: ErrorCode) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.stop_signal.send(true);
        self.inner.headers.fail(code);
        self.inner.inventory.fail(code);
        self.inner.get_blocks.fail(code);
        self.inner.transactions.fail(code);
        log_debug!("channel [{}] stopped: {}", self.inner.authority, code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{GetHeaders, InventoryKind, InventoryVector};

    fn headers_message() -> Message {
        Message::Headers(Headers {
            headers: Vec::new(),
        })
    }

    #[tokio::test]
    async fn delivery_is_single_shot() {
        let (channel, _out) = Channel::pair("10.0.0.1:8333", 4);
        let mut subscription = channel.subscribe_headers();
        assert!(channel.deliver(headers_message()));
        // Not re-armed: the second delivery is dropped.
        assert!(!channel.deliver(headers_message()));
        assert!(subscription.recv().await.is_ok());
    }

    #[tokio::test]
    async fn resubscribe_receives_next_message() {
        let (channel, _out) = Channel::pair("10.0.0.1:8333", 4);
        let mut first = channel.subscribe_headers();
        channel.deliver(headers_message());
        first.recv().await.expect("first delivery");
        let mut second = channel.subscribe_headers();
        assert!(channel.deliver(headers_message()));
        second.recv().await.expect("second delivery");
    }

    #[tokio::test]
    async fn unsubscribed_kind_is_dropped() {
        let (channel, _out) = Channel::pair("10.0.0.1:8333", 4);
        let message = Message::Inventory(Inventory {
            inventories: vec![InventoryVector {
                kind: InventoryKind::Block,
                hash: [1; 32],
            }],
        });
        assert!(!channel.deliver(message));
    }

    #[tokio::test]
    async fn stop_fails_armed_subscription() {
        let (channel, _out) = Channel::pair("10.0.0.1:8333", 4);
        let mut subscription = channel.subscribe_headers();
        channel.stop(ErrorCode::ChannelTimeout);
        assert_eq!(
            subscription.recv().await.err(),
            Some(ErrorCode::ChannelTimeout)
        );
        assert!(channel.stopped());
        // Delivery and send are refused after stop.
        assert!(!channel.deliver(headers_message()));
        let request = Message::GetHeaders(GetHeaders {
            locator: vec![[0; 32]],
            stop: [0; 32],
        });
        assert_eq!(
            channel.send(request).await,
            Err(ErrorCode::ChannelStopped)
        );
    }

    #[tokio::test]
    async fn stop_signal_observes_stop() {
        let (channel, _out) = Channel::pair("10.0.0.1:8333", 4);
        let mut signal = channel.stop_signal();
        channel.stop(ErrorCode::ChannelStopped);
        signal.changed().await.expect("stop notification");
        assert!(*signal.borrow());
    }
}
