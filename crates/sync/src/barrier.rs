use std::sync::{Arc, Mutex};

use cobalt_primitives::error::ErrorCode;
use tokio::sync::oneshot;

/// One-shot completion barrier: the first `fire` wins and wakes the
/// waiting handle, every later caller is dropped. Needed because the
/// receive path, the expiry tick, and a channel stop can all race to
/// finish the same sync attempt.
#[derive(Clone)]
pub struct Completion {
    sender: Arc<Mutex<Option<oneshot::Sender<ErrorCode>>>>,
}

pub struct CompletionHandle {
    rx: oneshot::Receiver<ErrorCode>,
}

impl Completion {
    pub fn pair() -> (Self, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            CompletionHandle { rx },
        )
    }

    /// Returns true only for the invocation that won.
    pub fn fire(&self, code: ErrorCode) -> bool {
        let taken = self.sender.lock().ok().and_then(|mut slot| slot.take());
        match taken {
            Some(sender) => {
                let _ = sender.send(code);
                true
            }
            None => false,
        }
    }

    pub fn fired(&self) -> bool {
        self.sender
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(true)
    }
}

impl CompletionHandle {
    pub async fn wait(self) -> ErrorCode {
        self.rx.await.unwrap_or(ErrorCode::ServiceStopped)
    }
}
