//! Process-wide registry of prompter mailboxes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RpcError;
use crate::prompter::{PromptHolder, Prompter};
use crate::Result;

/// Routes `Message`/`Prompt` calls to the [`Prompter`] registered
/// under an id, enforcing at most one in-flight call per id.
///
/// Logically a process-wide singleton: constructed explicitly in an
/// `Init` step and passed to consumers rather than hidden behind
/// module-level state.
#[derive(Default)]
pub struct PrompterBroker {
    holders: DashMap<String, Arc<PromptHolder>>,
}

impl PrompterBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `prompter` under a freshly generated id.
    pub fn register(&self, prompter: Box<dyn Prompter>) -> String {
        let id = Uuid::new_v4().to_string();
        self.holders.insert(id.clone(), PromptHolder::new(prompter));
        id
    }

    /// Unregisters the prompter under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not currently registered: an unregister of an
    /// unknown id is a caller logic error, not a runtime condition.
    pub async fn unregister(&self, id: &str) {
        let (_, holder) = self
            .holders
            .remove(id)
            .unwrap_or_else(|| panic!("unregister: unknown prompter id {id}"));
        holder.drain().await;
    }

    /// Delivers an informational message. A no-op if `id` is empty.
    pub async fn message(&self, id: &str, text: String) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        let holder = self.holder(id)?;
        let prompter = holder
            .acquire_uncancellable()
            .await
            .map_err(|err| tag(err, id))?;
        let result = prompter.message(text).await;
        holder.release(prompter).await;
        result
    }

    /// Asks a question and returns the user's response, respecting
    /// `cancel`. The mailbox is refilled even if the prompter itself
    /// returns an error.
    pub async fn prompt(&self, cancel: CancellationToken, id: &str, text: String) -> Result<String> {
        if id.is_empty() {
            return Err(RpcError::PrompterNotFound(id.to_string()));
        }
        let holder = self.holder(id)?;
        let prompter = holder.acquire(&cancel).await.map_err(|err| tag(err, id))?;

        let holder_for_release = Arc::clone(&holder);
        let handle = tokio::spawn(async move {
            let response = prompter.prompt(text).await;
            holder_for_release.release(prompter).await;
            response
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            joined = handle => match joined {
                Ok(response) => response,
                Err(_) => Err(RpcError::Cancelled),
            },
        }
    }

    fn holder(&self, id: &str) -> Result<Arc<PromptHolder>> {
        self.holders
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RpcError::PrompterNotFound(id.to_string()))
    }
}

fn tag(err: RpcError, id: &str) -> RpcError {
    match err {
        RpcError::PrompterUnavailable(_) => RpcError::PrompterUnavailable(id.to_string()),
        other => other,
    }
}
