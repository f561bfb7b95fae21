use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use cobalt_log::log_debug;
use cobalt_primitives::error::ErrorCode;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::channel::{Channel, Subscription};
use crate::message::Message;

/// The boundary to the connection fabric. Discovery, dialing, and the
/// version handshake happen elsewhere; fully established channels are
/// attached here and fan out to every armed subscriber.
#[derive(Default)]
pub struct PeerProtocol {
    started: AtomicBool,
    channels: Mutex<Vec<Channel>>,
    subscribers: Mutex<Vec<mpsc::Sender<Result<Channel, ErrorCode>>>>,
}

impl PeerProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Result<(), ErrorCode> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ErrorCode::OperationFailed);
        }
        Ok(())
    }

    /// Stops every channel and ends every channel subscription with
    /// `ServiceStopped`.
    pub fn stop(&self) -> Result<(), ErrorCode> {
        self.started.store(false, Ordering::SeqCst);
        let channels = match self.channels.lock() {
            Ok(mut channels) => channels.drain(..).collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for channel in channels {
            channel.stop(ErrorCode::ServiceStopped);
        }
        let subscribers = match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.drain(..).collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for subscriber in subscribers {
            let _ = subscriber.try_send(Err(ErrorCode::ServiceStopped));
        }
        Ok(())
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Single-shot: each armed subscriber sees the next attached channel
    /// once and must re-subscribe for the one after.
    pub fn subscribe_channel(&self) -> Subscription<Channel> {
        let (tx, rx) = mpsc::channel(1);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        Subscription::new(rx)
    }

    /// Called by the fabric once a connection has completed its handshake.
    pub fn attach(&self, channel: Channel) {
        if !self.started() {
            channel.stop(ErrorCode::ServiceStopped);
            return;
        }
        if let Ok(mut channels) = self.channels.lock() {
            channels.retain(|entry| !entry.stopped());
            channels.push(channel.clone());
        }
        let subscribers = match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.drain(..).collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for subscriber in subscribers {
            let _ = subscriber.try_send(Ok(channel.clone()));
        }
        log_debug!("channel [{}] attached", channel.authority());
    }

    /// Sends to every live channel, pruning dead ones. Per-channel send
    /// failures only reduce the delivered count.
    pub async fn broadcast(&self, message: Message) -> usize {
        let channels = match self.channels.lock() {
            Ok(mut channels) => {
                channels.retain(|entry| !entry.stopped());
                channels.clone()
            }
            Err(_) => Vec::new(),
        };
        let mut count = 0;
        for channel in channels {
            if channel.send(message.clone()).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// A random live channel for the next header-sync attempt, skipping
    /// authorities already found exhausted.
    pub fn sync_candidate(&self, exclude: &HashSet<String>) -> Result<Option<Channel>, ErrorCode> {
        if !self.started() {
            return Err(ErrorCode::ServiceStopped);
        }
        let mut channels = self.channels.lock().map_err(|_| ErrorCode::OperationFailed)?;
        channels.retain(|entry| !entry.stopped());
        let candidates: Vec<&Channel> = channels
            .iter()
            .filter(|entry| !exclude.contains(entry.authority()))
            .collect();
        Ok(candidates.choose(&mut rand::thread_rng()).map(|entry| (*entry).clone()))
    }

    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .map(|channels| channels.iter().filter(|entry| !entry.stopped()).count())
            .unwrap_or(0)
    }
}
