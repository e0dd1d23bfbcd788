//! Time accumulator. Coalesces many small pushes into fewer flushed groups.
//!
//! Producers push without waiting. A background eviction task wakes every
//! `max_allowed_time` minus a random deviation in `[0, max_deviation_time)`,
//! takes everything buffered so far and emits it as one group on a bounded
//! output channel. Empty windows emit nothing.
//!
//! Items still buffered when shutdown fires are dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc};

use crate::error::SetupError;

/// Shortest accepted window.
pub const MIN_MAX_ALLOWED_TIME: Duration =
    Duration::from_millis(shardcast_core::config::MIN_MAX_ALLOWED_TIME_MS);

/// Capacity of the output channel, in groups.
const OUTPUT_CAPACITY: usize = 1;

pub struct TimeAccumulator<T> {
    buffer: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> TimeAccumulator<T> {
    /// Start an accumulator. Must be called inside a tokio runtime.
    ///
    /// Returns the push handle and the receiving end of the output channel.
    /// The eviction task stops when `shutdown` fires or the receiver is dropped.
    pub fn new(
        max_allowed_time: Duration,
        max_deviation_time: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(Self, mpsc::Receiver<Vec<T>>), SetupError> {
        let window = Window::new(max_allowed_time, max_deviation_time)?;
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CAPACITY);

        tokio::spawn(eviction_loop(buffer.clone(), output_tx, window, shutdown));

        Ok((Self { buffer }, output_rx))
    }

    pub fn add(&self, item: T) {
        self.lock().push(item);
    }

    /// Add several items. They are guaranteed to land in the same group.
    pub fn add_all(&self, items: impl IntoIterator<Item = T>) {
        self.lock().extend(items);
    }

    /// Items waiting for the next eviction.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Drop everything waiting for the next eviction and return how many
    /// items went.
    pub fn drain(&self) -> usize {
        std::mem::take(&mut *self.lock()).len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Validated timing parameters.
#[derive(Debug, Clone, Copy)]
struct Window {
    max_allowed: Duration,
    max_deviation: Duration,
}

impl Window {
    fn new(max_allowed: Duration, max_deviation: Duration) -> Result<Self, SetupError> {
        if max_allowed < MIN_MAX_ALLOWED_TIME {
            return Err(SetupError::MaxAllowedTimeTooSmall {
                min_ms: MIN_MAX_ALLOWED_TIME.as_millis() as u64,
            });
        }
        if max_deviation >= max_allowed {
            return Err(SetupError::DeviationNotBelowAllowed);
        }
        Ok(Self {
            max_allowed,
            max_deviation,
        })
    }

    fn next_wait(&self) -> Duration {
        let nanos = self.max_deviation.as_nanos() as u64;
        if nanos == 0 {
            return self.max_allowed;
        }
        let jitter = rand::thread_rng().gen_range(0..nanos);
        self.max_allowed - Duration::from_nanos(jitter)
    }
}

async fn eviction_loop<T: Send + 'static>(
    buffer: Arc<Mutex<Vec<T>>>,
    output: mpsc::Sender<Vec<T>>,
    window: Window,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let wait = window.next_wait();
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("accumulator eviction stopping");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let group = std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
        if group.is_empty() {
            continue;
        }

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("accumulator eviction stopping with a group in hand");
                return;
            }
            sent = output.send(group) => {
                if sent.is_err() {
                    tracing::debug!("accumulator output dropped, eviction stopping");
                    return;
                }
            }
        }
    }
}
