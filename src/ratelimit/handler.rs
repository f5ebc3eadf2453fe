//! Completion callbacks run for every admitted payload.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;

/// Async handler invoked once per admitted payload.
///
/// Invocations run concurrently on independent tasks, one per admission,
/// and are not serialized by the limiter.
#[async_trait]
pub trait CompletionHandler<T: Send + 'static>: Send + Sync {
    /// Process a payload that has been granted a token.
    async fn on_admitted(&self, payload: T);
}

/// The registered completion, either a plain closure or an async handler.
pub(crate) enum Completion<T: Send + 'static> {
    /// Run on the blocking pool so slow closures never stall the runtime
    Blocking(Arc<dyn Fn(T) + Send + Sync>),
    Async(Arc<dyn CompletionHandler<T>>),
}

impl<T: Send + 'static> Completion<T> {
    /// Hand the payload to the completion on a fresh task.
    pub(crate) fn dispatch(&self, runtime: &Handle, payload: T) {
        match self {
            Completion::Blocking(callback) => {
                let callback = Arc::clone(callback);
                runtime.spawn_blocking(move || callback(payload));
            }
            Completion::Async(handler) => {
                let handler = Arc::clone(handler);
                runtime.spawn(async move { handler.on_admitted(payload).await });
            }
        }
    }
}
