use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use cobalt_primitives::error::ErrorCode;
use cobalt_primitives::transaction::Transaction;
use cobalt_primitives::Hash256;
use tokio::sync::oneshot;

use crate::{Accepted, ChainStore, ReorganizeEvent, ReorganizeSubscription, TransactionPool};

/// In-process chain store holding one header hash per height. Backs the
/// binary's wiring and the test suites; a persistent store plugs in
/// behind the same trait.
#[derive(Default)]
pub struct MemoryChain {
    headers: Mutex<Vec<Hash256>>,
    armed: Mutex<Option<oneshot::Sender<ReorganizeEvent>>>,
    pending: Mutex<VecDeque<ReorganizeEvent>>,
    stopped: AtomicBool,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_genesis(genesis: Hash256) -> Self {
        let chain = Self::default();
        chain.push_header(genesis);
        chain
    }

    pub fn push_header(&self, hash: Hash256) {
        if let Ok(mut headers) = self.headers.lock() {
            headers.push(hash);
        }
    }

    /// Fires the armed reorganization subscriber, or queues the event so
    /// a later subscriber still sees events in chain order.
    pub fn announce_reorganize(&self, event: ReorganizeEvent) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let armed = self.armed.lock().ok().and_then(|mut slot| slot.take());
        match armed {
            Some(sender) => {
                if let Err(event) = sender.send(event) {
                    self.queue_pending(event);
                }
            }
            None => self.queue_pending(event),
        }
    }

    fn queue_pending(&self, event: ReorganizeEvent) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(event);
        }
    }
}

impl ChainStore for MemoryChain {
    fn start(&self) -> Result<(), ErrorCode> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), ErrorCode> {
        self.stopped.store(true, Ordering::SeqCst);
        // Dropping the armed sender surfaces ServiceStopped to the subscriber.
        if let Ok(mut armed) = self.armed.lock() {
            armed.take();
        }
        Ok(())
    }

    fn fetch_last_height(&self) -> Result<i32, ErrorCode> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ErrorCode::ServiceStopped);
        }
        let headers = self
            .headers
            .lock()
            .map_err(|_| ErrorCode::OperationFailed)?;
        Ok(headers.len() as i32 - 1)
    }

    fn fetch_header_hash(&self, height: i32) -> Result<Option<Hash256>, ErrorCode> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ErrorCode::ServiceStopped);
        }
        if height < 0 {
            return Ok(None);
        }
        let headers = self
            .headers
            .lock()
            .map_err(|_| ErrorCode::OperationFailed)?;
        Ok(headers.get(height as usize).copied())
    }

    fn subscribe_reorganize(&self) -> ReorganizeSubscription {
        let (tx, rx) = oneshot::channel();
        if self.stopped.load(Ordering::SeqCst) {
            return ReorganizeSubscription::new(rx);
        }
        let queued = self.pending.lock().ok().and_then(|mut pending| pending.pop_front());
        match queued {
            Some(event) => {
                let _ = tx.send(event);
            }
            None => {
                if let Ok(mut armed) = self.armed.lock() {
                    *armed = Some(tx);
                }
            }
        }
        ReorganizeSubscription::new(rx)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub minimum_fee_satoshis: u64,
    pub reject_conflicts: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            minimum_fee_satoshis: 1,
            reject_conflicts: true,
        }
    }
}

/// In-process transaction pool keyed by hash. Transactions are opaque
/// here, so conflict detection reduces to first-seen duplicates.
#[derive(Default)]
pub struct MemoryPool {
    settings: PoolSettings,
    entries: Mutex<HashSet<Hash256>>,
}

impl MemoryPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashSet::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionPool for MemoryPool {
    fn start(&self) -> Result<(), ErrorCode> {
        Ok(())
    }

    fn exists(&self, hash: &Hash256) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains(hash))
            .unwrap_or(false)
    }

    fn store(&self, tx: Transaction) -> Result<Accepted, ErrorCode> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ErrorCode::OperationFailed)?;
        if !entries.insert(tx.hash()) && self.settings.reject_conflicts {
            return Err(ErrorCode::OperationFailed);
        }
        Ok(Accepted::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(fork_point: i32) -> ReorganizeEvent {
        ReorganizeEvent {
            fork_point,
            new_blocks: Vec::new(),
            replaced_blocks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn reorganize_delivers_to_armed_subscriber() {
        let chain = MemoryChain::new();
        let subscription = chain.subscribe_reorganize();
        chain.announce_reorganize(event(7));
        let received = subscription.recv().await.expect("event");
        assert_eq!(received.fork_point, 7);
    }

    #[tokio::test]
    async fn reorganize_queues_in_chain_order() {
        let chain = MemoryChain::new();
        chain.announce_reorganize(event(1));
        chain.announce_reorganize(event(2));
        assert_eq!(chain.subscribe_reorganize().recv().await.unwrap().fork_point, 1);
        assert_eq!(chain.subscribe_reorganize().recv().await.unwrap().fork_point, 2);
    }

    #[tokio::test]
    async fn stop_surfaces_service_stopped() {
        let chain = MemoryChain::new();
        let subscription = chain.subscribe_reorganize();
        chain.stop().unwrap();
        match subscription.recv().await {
            Err(ErrorCode::ServiceStopped) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(chain.fetch_last_height(), Err(ErrorCode::ServiceStopped));
    }

    #[test]
    fn heights_index_from_genesis() {
        let chain = MemoryChain::with_genesis([0xaa; 32]);
        assert_eq!(chain.fetch_last_height(), Ok(0));
        assert_eq!(chain.fetch_header_hash(0), Ok(Some([0xaa; 32])));
        assert_eq!(chain.fetch_header_hash(1), Ok(None));
        assert_eq!(chain.fetch_header_hash(-1), Ok(None));
        assert_eq!(MemoryChain::new().fetch_last_height(), Ok(-1));
    }

    #[test]
    fn pool_rejects_duplicates_when_first_seen() {
        let pool = MemoryPool::new(PoolSettings::default());
        let tx = Transaction::new(vec![1, 2, 3]);
        assert!(!pool.exists(&tx.hash()));
        pool.store(tx.clone()).expect("store");
        assert!(pool.exists(&tx.hash()));
        assert_eq!(pool.store(tx), Err(ErrorCode::OperationFailed));
    }
}
