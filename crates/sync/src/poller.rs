use std::sync::Arc;
use std::time::Duration;

use cobalt_chain::ChainStore;
use cobalt_log::log_debug;
use cobalt_network::channel::Channel;
use cobalt_network::message::{GetBlocks, Message};
use cobalt_primitives::{Hash256, ZERO_HASH};

/// Keeps block download moving: asks each new channel what it has past
/// our tip and re-asks on a fixed cadence until the channel dies. What
/// comes back is the chain store's business.
pub struct Poller<C: ChainStore> {
    chain: Arc<C>,
    poll_interval: Duration,
}

impl<C: ChainStore + 'static> Poller<C> {
    pub fn new(chain: Arc<C>, poll_interval: Duration) -> Self {
        Self {
            chain,
            poll_interval,
        }
    }

    /// One `getblocks` probe anchored at the current tip.
    pub async fn query(&self, channel: &Channel) {
        Self::send_query(self.chain.as_ref(), channel).await;
    }

    /// Re-probes the channel every poll interval until it stops.
    pub fn monitor(&self, channel: &Channel) {
        let chain = Arc::clone(&self.chain);
        let channel = channel.clone();
        let period = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            let mut stop_signal = channel.stop_signal();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if channel.stopped() {
                            break;
                        }
                        Self::send_query(chain.as_ref(), &channel).await;
                    }
                    _ = stop_signal.changed() => break,
                }
            }
        });
    }

    async fn send_query(chain: &C, channel: &Channel) {
        let Some(locator) = Self::locator(chain) else {
            return;
        };
        let request = GetBlocks {
            locator,
            stop: ZERO_HASH,
        };
        if let Err(code) = channel.send(Message::GetBlocks(request)).await {
            log_debug!(
                "block query failed for [{}]: {}",
                channel.authority(),
                code
            );
        }
    }

    fn locator(chain: &C) -> Option<Vec<Hash256>> {
        let height = chain.fetch_last_height().ok()?;
        let hash = chain.fetch_header_hash(height).ok()??;
        Some(vec![hash])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_chain::memory::MemoryChain;
    use cobalt_primitives::error::ErrorCode;

    #[tokio::test]
    async fn query_sends_tip_anchored_getblocks() {
        let chain = Arc::new(MemoryChain::with_genesis([0xaa; 32]));
        let poller = Poller::new(Arc::clone(&chain), Duration::from_secs(1));
        let (channel, mut out) = Channel::pair("10.0.0.1:8333", 4);
        poller.query(&channel).await;
        match out.recv().await {
            Some(Message::GetBlocks(request)) => {
                assert_eq!(request.locator, vec![[0xaa; 32]]);
                assert_eq!(request.stop, ZERO_HASH);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_skips_empty_chain() {
        let chain = Arc::new(MemoryChain::new());
        let poller = Poller::new(chain, Duration::from_secs(1));
        let (channel, mut out) = Channel::pair("10.0.0.1:8333", 4);
        poller.query(&channel).await;
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_reprobes_until_stop() {
        let chain = Arc::new(MemoryChain::with_genesis([0xaa; 32]));
        let poller = Poller::new(Arc::clone(&chain), Duration::from_secs(1));
        let (channel, mut out) = Channel::pair("10.0.0.1:8333", 8);
        poller.monitor(&channel);
        assert!(matches!(out.recv().await, Some(Message::GetBlocks(_))));
        assert!(matches!(out.recv().await, Some(Message::GetBlocks(_))));
        channel.stop(ErrorCode::ChannelStopped);
        drop(channel);
        // The monitor task exits; the outbound queue closes with it.
        assert!(out.recv().await.is_none());
    }
}
