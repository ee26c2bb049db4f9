use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Trailing-edge debouncer.
///
/// Every pushed item restarts a fixed-delay timer. When the timer expires with
/// no newer item, the callback runs once with the most recent item; earlier
/// items in the burst are discarded. Dropping the debouncer discards anything
/// still pending.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn the timer task. Must be called from within a tokio runtime.
    pub fn spawn<F>(delay: Duration, mut on_fire: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let task = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut latest = first;
                let quiet = loop {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(item) => latest = item,
                            None => break false,
                        },
                        () = tokio::time::sleep(delay) => break true,
                    }
                };
                if !quiet {
                    return;
                }
                on_fire(latest);
            }
        });
        Self { tx, task }
    }

    /// A sender that feeds this debouncer, usable from non-async threads.
    pub fn sender(&self) -> mpsc::UnboundedSender<T> {
        self.tx.clone()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
