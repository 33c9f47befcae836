use std::future::Future;
use std::pin::Pin;

enum Value<T> {
    Ready(T),
    Pending(Pin<Box<dyn Future<Output = T> + Send + 'static>>),
}

/// Result of a user callback that is either available now or produced by a future
///
/// Synchronous listeners return [`MaybeAsync::ready`] and never pay for a boxed future.
#[must_use]
pub struct MaybeAsync<T> {
    inner: Value<T>,
}

impl<T> MaybeAsync<T> {
    /// Retrieve the value, awaiting the future if there is one
    pub async fn get(self) -> T {
        match self.inner {
            Value::Ready(x) => x,
            Value::Pending(x) => x.await,
        }
    }

    /// Wrap a value that is already available
    pub fn ready(value: T) -> Self {
        MaybeAsync {
            inner: Value::Ready(value),
        }
    }

    /// Wrap a future that eventually yields the value
    pub fn asynchronous<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        MaybeAsync {
            inner: Value::Pending(Box::pin(future)),
        }
    }
}
