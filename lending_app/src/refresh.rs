use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use opentelemetry_sdk::util::tokio_interval_stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Matches the polling period of the original views.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Shared tick publisher. Views that hold server-fetched data take a
/// [`RefreshSubscription`] and re-poll whenever the timestamp advances;
/// dropping the subscription detaches it, dropping the publisher stops the
/// ticker task.
pub struct AutoRefresh {
    tick: watch::Sender<i64>,
    subscribers: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl AutoRefresh {
    pub fn start(interval: Duration) -> Self {
        let (tick_tx, _) = watch::channel(chrono::Utc::now().timestamp_millis());
        let publisher = tick_tx.clone();
        let task = tokio::spawn(async move {
            let mut ticks = tokio_interval_stream(interval);
            while ticks.next().await.is_some() {
                let now = chrono::Utc::now().timestamp_millis();
                publisher.send_modify(|last| {
                    // Strictly increasing even if the wall clock stalls or
                    // steps backwards.
                    *last = if now > *last { now } else { *last + 1 };
                });
            }
        });
        Self {
            tick: tick_tx,
            subscribers: Arc::new(AtomicUsize::new(0)),
            task,
        }
    }

    pub fn subscribe(&self) -> RefreshSubscription {
        self.subscribers.fetch_add(1, Ordering::Relaxed);
        RefreshSubscription {
            rx: self.tick.subscribe(),
            subscribers: self.subscribers.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct RefreshSubscription {
    rx: watch::Receiver<i64>,
    subscribers: Arc<AtomicUsize>,
}

impl RefreshSubscription {
    /// Waits for the next tick and returns its timestamp, or `None` once the
    /// publisher is gone.
    pub async fn tick(&mut self) -> Option<i64> {
        match self.rx.changed().await {
            Ok(()) => Some(*self.rx.borrow_and_update()),
            Err(_) => None,
        }
    }

    pub fn last_tick(&self) -> i64 {
        *self.rx.borrow()
    }
}

impl Drop for RefreshSubscription {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::Relaxed);
    }
}
