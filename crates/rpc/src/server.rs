//! Method dispatch: accepts connections, reads the method-name
//! preamble, and hands the call off to a registered handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::call::Call;
use crate::Result;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A method handler: given an open call (reader and writer halves
/// already split off), drives the exchange to completion.
pub type Handler<R, W> = Box<dyn Fn(Call<R, W>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Maps method names to their handlers.
pub struct HandlerTable<R, W> {
    handlers: HashMap<String, Handler<R, W>>,
}

impl<R, W> Default for HandlerTable<R, W> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<R, W> HandlerTable<R, W>
where
    R: Send + 'static,
    W: Send + 'static,
{
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `method`, replacing any prior
    /// registration for the same name.
    pub fn register<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Call<R, W>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .insert(method.into(), Box::new(move |call| Box::pin(handler(call))));
    }
}

/// A source of inbound connections, abstracting over the transport
/// (multiplexed channel, raw socket, in-memory duplex in tests).
pub trait Acceptor: Send {
    /// The reader half of an accepted connection.
    type Reader: AsyncRead + Send + Unpin + 'static;
    /// The writer half of an accepted connection.
    type Writer: AsyncWrite + Send + Unpin + 'static;

    /// Waits for the next inbound connection.
    fn accept(&mut self) -> BoxFuture<'_, Result<(Self::Reader, Self::Writer)>>;
}

/// Serves `handlers` over connections produced by `acceptor` until it
/// returns an error, at which point the loop exits.
///
/// Each accepted connection is handled in its own task: the method
/// name is read off first, and if no handler is registered for it the
/// connection is simply dropped rather than answered with an error,
/// since an unrecognized method indicates a protocol mismatch no
/// response could meaningfully resolve.
pub async fn serve<A>(mut acceptor: A, handlers: Arc<HandlerTable<A::Reader, A::Writer>>)
where
    A: Acceptor,
{
    loop {
        let (reader, writer) = match acceptor.accept().await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(error = %err, "accept loop ending");
                return;
            }
        };

        let handlers = Arc::clone(&handlers);
        tokio::spawn(async move {
            let accepted = Call::accept(reader, writer).await;
            match accepted {
                Ok(Some((method, call))) => {
                    if let Some(handler) = handlers.handlers.get(&method) {
                        handler(call).await;
                    } else {
                        debug!(%method, "no handler registered for method, dropping connection");
                    }
                }
                Ok(None) => debug!("peer closed connection before sending a method name"),
                Err(err) => warn!(error = %err, "failed to accept call"),
            }
        });
    }
}
