//! The prompter capability and its single-capacity mailbox.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::Result;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered handler for interactive authentication prompts issued
/// on the remote side and answered locally.
pub trait Prompter: Send + Sync + 'static {
    /// Delivers an informational message; no response is expected.
    fn message(&self, text: String) -> BoxFuture<'_, Result<()>>;
    /// Asks a question and returns the user's response.
    fn prompt(&self, text: String) -> BoxFuture<'_, Result<String>>;
}

enum Slot {
    Present(Box<dyn Prompter>),
    Empty,
    Drained,
}

/// A single-capacity mailbox holding at most one registered
/// [`Prompter`]. Enforces "at most one in-flight `Prompt` or
/// `Message` at any time" by making acquisition take the prompter out
/// of the slot for the duration of the call.
pub(crate) struct PromptHolder {
    slot: Mutex<Slot>,
    changed: Notify,
}

impl PromptHolder {
    pub(crate) fn new(prompter: Box<dyn Prompter>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Present(prompter)),
            changed: Notify::new(),
        })
    }

    /// Waits for the prompter to be present and takes it out of the
    /// slot, respecting `cancel`.
    pub(crate) async fn acquire(&self, cancel: &CancellationToken) -> Result<Box<dyn Prompter>> {
        loop {
            if let Some(outcome) = self.try_take().await? {
                return Ok(outcome);
            }
            let notified = self.changed.notified();
            tokio::select! {
                _ = cancel.cancelled() => return Err(RpcError::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Like [`Self::acquire`] but not cancellable, used by `Message`.
    pub(crate) async fn acquire_uncancellable(&self) -> Result<Box<dyn Prompter>> {
        loop {
            if let Some(outcome) = self.try_take().await? {
                return Ok(outcome);
            }
            self.changed.notified().await;
        }
    }

    async fn try_take(&self) -> Result<Option<Box<dyn Prompter>>> {
        let mut guard = self.slot.lock().await;
        match &*guard {
            Slot::Drained => Err(RpcError::PrompterUnavailable(String::new())),
            Slot::Empty => Ok(None),
            Slot::Present(_) => {
                let Slot::Present(prompter) = std::mem::replace(&mut *guard, Slot::Empty) else {
                    unreachable!()
                };
                Ok(Some(prompter))
            }
        }
    }

    /// Returns `prompter` to the slot, refilling it for the next
    /// acquirer.
    pub(crate) async fn release(&self, prompter: Box<dyn Prompter>) {
        let mut guard = self.slot.lock().await;
        *guard = Slot::Present(prompter);
        drop(guard);
        self.changed.notify_waiters();
    }

    /// Waits for any in-flight call to return the prompter, then
    /// permanently drains the holder.
    pub(crate) async fn drain(&self) {
        loop {
            let mut guard = self.slot.lock().await;
            match &*guard {
                Slot::Present(_) => {
                    *guard = Slot::Drained;
                    drop(guard);
                    self.changed.notify_waiters();
                    return;
                }
                Slot::Drained => return,
                Slot::Empty => {}
            }
            drop(guard);
            self.changed.notified().await;
        }
    }
}
