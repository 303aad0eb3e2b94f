// Queue of requests suspended on an in-progress refresh

use tokio::sync::oneshot;

use crate::error::RefreshError;

/// Outcome delivered to a waiter: the new access token or the refresh error
pub type RefreshOutcome = Result<String, RefreshError>;

/// Receiving half held by a suspended request
pub struct Waiter {
    rx: oneshot::Receiver<RefreshOutcome>,
}

impl Waiter {
    /// Waiter that already holds its outcome
    pub fn resolved(outcome: RefreshOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        // The receiver is alive, so this cannot fail
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Suspend until the refresh cycle resolves this waiter
    pub async fn wait(self) -> RefreshOutcome {
        self.rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }
}

/// Ordered set of resolution handles for one refresh cycle
///
/// Each handle is a `oneshot::Sender`, consumed when resolved, so a waiter
/// cannot be released and failed, or resolved twice.
#[derive(Default)]
pub struct WaiterQueue {
    senders: Vec<oneshot::Sender<RefreshOutcome>>,
}

impl WaiterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a waiter and return its receiving half
    pub fn enqueue(&mut self) -> Waiter {
        let (tx, rx) = oneshot::channel();
        self.senders.push(tx);
        Waiter { rx }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Resolve every waiter with `token`, in enqueue order
    pub fn release_all(self, token: &str) -> usize {
        self.resolve(|| Ok(token.to_string()))
    }

    /// Resolve every waiter with `error`, in enqueue order
    pub fn fail_all(self, error: &RefreshError) -> usize {
        self.resolve(|| Err(error.clone()))
    }

    fn resolve(self, outcome: impl Fn() -> RefreshOutcome) -> usize {
        let mut delivered = 0;
        for tx in self.senders {
            // A dropped receiver means the caller stopped waiting
            if tx.send(outcome()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
