use futures::future::BoxFuture;
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Delays a call until no newer call has arrived for a quiet window.
///
/// Each [Debouncer::call] replaces the pending call, so of a burst of calls
/// only the last one runs, one window after it arrived. Once a call has
/// started it runs to completion; cancelling only affects calls that are
/// still waiting.
///
/// Dropping the debouncer cancels the pending call.
///
/// # Examples
///
/// ```
/// use stac_query::Debouncer;
/// use std::{sync::{Arc, atomic::{AtomicUsize, Ordering}}, time::Duration};
///
/// # tokio_test::block_on(async {
/// let debouncer = Debouncer::new(Duration::from_millis(10));
/// let count = Arc::new(AtomicUsize::new(0));
/// for _ in 0..3 {
///     let count = count.clone();
///     debouncer.call(async move {
///         let _ = count.fetch_add(1, Ordering::SeqCst);
///     });
/// }
/// tokio::time::sleep(Duration::from_millis(50)).await;
/// assert_eq!(count.load(Ordering::SeqCst), 1);
/// # })
/// ```
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    call: Option<BoxFuture<'static, ()>>,
}

impl Debouncer {
    /// Creates a new debouncer with the given quiet window.
    pub fn new(window: Duration) -> Debouncer {
        Debouncer {
            window,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Returns the quiet window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedules `call`, replacing any call that hasn't started yet.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call<F>(&self, call: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.call = Some(Box::pin(call));
            slot.generation
        };
        let slot = self.slot.clone();
        let window = self.window;
        let _ = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let call = {
                let mut slot = lock(&slot);
                if slot.generation == generation {
                    slot.call.take()
                } else {
                    None
                }
            };
            if let Some(call) = call {
                call.await;
            }
        });
    }

    /// Drops the pending call, if there is one.
    pub fn cancel(&self) {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        slot.call = None;
    }

    /// Returns true if a call is waiting for its window to pass.
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).call.is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("generation", &self.generation)
            .field("pending", &self.call.is_some())
            .finish()
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::Debouncer;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> futures::future::BoxFuture<'static, ()>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let clone = calls.clone();
        let record = move |n: u32| {
            let calls = clone.clone();
            let future: futures::future::BoxFuture<'static, ()> = Box::pin(async move {
                calls.lock().unwrap().push(n);
            });
            future
        };
        (calls, record)
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_last_call_runs() {
        let (calls, record) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(300));
        debouncer.call(record(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.call(record(2));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.call(record(3));
        assert!(debouncer.is_pending());
        tokio::time::sleep(Duration::from_millis(299)).await;
        assert!(calls.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*calls.lock().unwrap(), vec![3]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_calls_all_run() {
        let (calls, record) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.call(record(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.call(record(2));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel() {
        let (calls, record) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.call(record(1));
        debouncer.cancel();
        assert!(!debouncer.is_pending());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let (calls, record) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.call(record(1));
        drop(debouncer);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(calls.lock().unwrap().is_empty());
    }
}
