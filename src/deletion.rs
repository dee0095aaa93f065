//! Deferred teardown queue for GPU resources.
//!
//! GPU resources cannot be destroyed by a plain `Drop` impl: destruction
//! needs the device handle, which a no-argument destructor does not have.
//! Instead, owners either call `destroy(&Context)` explicitly or push a
//! boxed teardown closure onto a [`DeletionQueue`].
//!
//! The queue flushes in strict LIFO order: later allocations may depend on
//! earlier ones (an image view on its image, a framebuffer on its views), so
//! teardown must run in reverse.

use parking_lot::Mutex;

use crate::context::Context;

/// A boxed teardown closure.
type Teardown = Box<dyn FnOnce(&Context) + Send>;

/// LIFO stack of teardown closures, flushed against a [`Context`].
///
/// Two instances exist in practice: the context-wide queue flushed at
/// shutdown, and a swapchain-scoped queue flushed on every swapchain
/// recreation (size-dependent images, views, framebuffers).
#[derive(Default)]
pub struct DeletionQueue {
    stack: Mutex<Vec<Teardown>>,
}

impl DeletionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a teardown closure. It runs when the queue is flushed, after
    /// every closure pushed later.
    pub fn push(&self, teardown: impl FnOnce(&Context) + Send + 'static) {
        self.stack.lock().push(Box::new(teardown));
    }

    /// Number of pending teardowns.
    pub fn len(&self) -> usize {
        self.stack.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }

    /// Run all pending teardowns in reverse push order.
    ///
    /// The caller must guarantee the GPU is no longer using any of the
    /// resources involved (device-idle or fence-complete).
    pub fn flush(&self, context: &Context) {
        let mut stack = std::mem::take(&mut *self.stack.lock());
        while let Some(teardown) = stack.pop() {
            teardown(context);
        }
    }
}

impl std::fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    /// Flushing needs a `Context`, so the ordering contract is exercised
    /// through the same pop-loop discipline over plain closures.
    #[test]
    fn test_lifo_flush_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack: Vec<Box<dyn FnOnce()>> = Vec::new();
        for i in 0..4 {
            let order = Arc::clone(&order);
            stack.push(Box::new(move || order.lock().push(i)));
        }
        while let Some(teardown) = stack.pop() {
            teardown();
        }
        assert_eq!(*order.lock(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_len_tracks_pushes() {
        let queue = super::DeletionQueue::new();
        assert!(queue.is_empty());
        queue.push(|_| {});
        queue.push(|_| {});
        assert_eq!(queue.len(), 2);
    }
}
