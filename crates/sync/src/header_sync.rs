use std::sync::{Arc, Mutex};
use std::time::Duration;

use cobalt_log::{log_debug, log_info, log_warn};
use cobalt_network::channel::Channel;
use cobalt_network::message::{GetHeaders, Headers, Message, MAX_HEADERS_PER_MESSAGE};
use cobalt_primitives::error::ErrorCode;

use crate::barrier::{Completion, CompletionHandle};
use crate::header_table::HeaderTable;
use crate::timer::ExpiryTimer;

/// One header-sync attempt against one peer. Pulls `headers` batches
/// into the shared table until the stop hash is reached, the peer runs
/// dry, linkage breaks, or the measured rate falls under the floor.
///
/// The completion handle fires exactly once with the terminal code; the
/// channel is stopped afterwards regardless of outcome.
pub struct HeaderSync {
    channel: Channel,
    table: Arc<Mutex<HeaderTable>>,
    minimum_rate: u32,
    expiry_interval: Duration,
    elapsed_secs: u64,
    start_size: i64,
}

impl HeaderSync {
    pub fn new(
        channel: Channel,
        table: Arc<Mutex<HeaderTable>>,
        minimum_rate: u32,
        expiry_interval: Duration,
    ) -> Self {
        // Anchored at construction, so the rate averages over this
        // attempt's lifetime only.
        let start_size = table
            .lock()
            .map(|table| i64::from(table.previous_height()) - i64::from(table.first_height()))
            .unwrap_or(0);
        Self {
            channel,
            table,
            minimum_rate,
            expiry_interval,
            elapsed_secs: 0,
            start_size,
        }
    }

    pub fn start(self) -> CompletionHandle {
        let (complete, handle) = Completion::pair();
        tokio::spawn(self.run(complete));
        handle
    }

    async fn run(mut self, complete: Completion) {
        let mut timer = ExpiryTimer::new(self.expiry_interval);
        let mut stop_signal = self.channel.stop_signal();
        let mut headers = self.channel.subscribe_headers();
        self.send_get_headers(&complete).await;

        while !complete.fired() && !self.channel.stopped() {
            tokio::select! {
                delivery = headers.recv() => {
                    if !self.handle_receive_headers(delivery, &complete).await {
                        break;
                    }
                    headers = self.channel.subscribe_headers();
                }
                code = timer.tick() => {
                    let code = if self.channel.stopped() {
                        ErrorCode::ChannelStopped
                    } else {
                        code
                    };
                    self.handle_event(code, &complete);
                    if code == ErrorCode::ChannelStopped {
                        break;
                    }
                }
                _ = stop_signal.changed() => {
                    self.handle_event(ErrorCode::ChannelStopped, &complete);
                    break;
                }
            }
        }

        // Covers exits where nothing fired, e.g. a channel that died
        // before the loop observed it.
        complete.fire(ErrorCode::ChannelStopped);
        self.channel.stop(ErrorCode::ChannelStopped);
    }

    async fn send_get_headers(&self, complete: &Completion) {
        if self.channel.stopped() {
            return;
        }
        let request = {
            let Ok(table) = self.table.lock() else {
                complete.fire(ErrorCode::OperationFailed);
                return;
            };
            GetHeaders {
                locator: vec![table.previous_hash()],
                stop: table.stop_hash(),
            }
        };
        if let Err(code) = self.channel.send(Message::GetHeaders(request)).await {
            log_debug!(
                "failure sending get headers to sync [{}]: {}",
                self.channel.authority(),
                code
            );
            complete.fire(code);
        }
    }

    /// Returns the keep-subscription flag: false unsubscribes on every
    /// terminal transition.
    async fn handle_receive_headers(
        &mut self,
        delivery: Result<Headers, ErrorCode>,
        complete: &Completion,
    ) -> bool {
        if self.channel.stopped() {
            return false;
        }
        let message = match delivery {
            Ok(message) => message,
            Err(code) => {
                log_debug!(
                    "failure receiving headers from sync [{}]: {}",
                    self.channel.authority(),
                    code
                );
                complete.fire(code);
                return false;
            }
        };

        let (merged, completed, start, end) = {
            let Ok(mut table) = self.table.lock() else {
                complete.fire(ErrorCode::OperationFailed);
                return false;
            };
            let start = table.previous_height() + 1;
            let merged = table.merge(&message.headers);
            (merged, table.complete(), start, table.previous_height())
        };

        if !merged {
            log_warn!(
                "failure merging headers from [{}]",
                self.channel.authority()
            );
            complete.fire(ErrorCode::InvalidPreviousBlock);
            return false;
        }

        log_info!(
            "synced headers {}-{} from [{}]",
            start,
            end,
            self.channel.authority()
        );

        if completed {
            complete.fire(ErrorCode::Success);
            return false;
        }

        // Fewer than a full batch short of the stop hash: the peer is
        // exhausted, let the session try another.
        if message.headers.len() < MAX_HEADERS_PER_MESSAGE {
            complete.fire(ErrorCode::OperationFailed);
            return false;
        }

        self.send_get_headers(complete).await;
        true
    }

    /// Fired by the expiry timer and the stop path.
    fn handle_event(&mut self, code: ErrorCode, complete: &Completion) {
        if code == ErrorCode::ChannelStopped {
            complete.fire(code);
            return;
        }

        if code != ErrorCode::ChannelTimeout {
            log_warn!(
                "failure in header sync timer for [{}]: {}",
                self.channel.authority(),
                code
            );
            complete.fire(code);
            return;
        }

        // Another expiry period has passed; saturate rather than wrap.
        self.elapsed_secs = self
            .elapsed_secs
            .saturating_add(self.expiry_interval.as_secs().max(1));
        let gained = {
            let Ok(table) = self.table.lock() else {
                complete.fire(ErrorCode::OperationFailed);
                return;
            };
            (i64::from(table.previous_height()) - self.start_size).max(0) as u64
        };
        let rate = gained / self.elapsed_secs;

        // Drop the channel if it falls under the floor averaged over this
        // attempt's lifetime; a briefly slow peer can still recover.
        if rate < u64::from(self.minimum_rate) {
            log_debug!(
                "header sync rate ({}/sec) from [{}]",
                rate,
                self.channel.authority()
            );
            complete.fire(ErrorCode::ChannelTimeout);
        }
    }
}
