// ABOUTME: Cooperative cancellation for running graphs
// ABOUTME: A handle flips a watch flag that task bodies observe at their own safe points

use std::sync::Arc;
use tokio::sync::watch;

/// Owned by whoever may stop an execution
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side handed to task bodies and the lifecycle manager
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        CancellationHandle::new().signal()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
