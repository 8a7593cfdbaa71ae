//! Keepalive heartbeat.
//!
//! Periodically sends SSH_MSG_IGNORE so idle sessions are not dropped by
//! middleboxes. The task stops on the first failed send.

use crate::ssh::message::Message;
use conduit_platform::ConduitResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Keepalive task handle.
///
/// Manages a background task that calls a send function once per interval.
pub struct KeepaliveTask {
    interval: Duration,
    stop_signal: Arc<AtomicBool>,
    task_handle: Option<JoinHandle<()>>,
}

impl KeepaliveTask {
    /// Creates a new keepalive task (but doesn't start it).
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop_signal: Arc::new(AtomicBool::new(false)),
            task_handle: None,
        }
    }

    /// Interval between sends
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts the task.
    ///
    /// # Arguments
    ///
    /// * `send_fn` - Async closure that sends one keepalive
    pub fn start<F, Fut>(&mut self, send_fn: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ConduitResult<()>> + Send + 'static,
    {
        let interval = self.interval;
        let stop_signal = Arc::clone(&self.stop_signal);

        let handle = tokio::spawn(async move {
            debug!(interval = ?interval, "keepalive started");

            loop {
                tokio::time::sleep(interval).await;

                if stop_signal.load(Ordering::Relaxed) {
                    break;
                }

                if let Err(e) = send_fn().await {
                    warn!(error = %e, "keepalive failed, stopping");
                    break;
                }
            }

            debug!("keepalive stopped");
        });

        self.task_handle = Some(handle);
    }

    /// Stops the task.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::Relaxed);

        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }

    /// Returns whether the task is running.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for KeepaliveTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// SSH_MSG_IGNORE carrying `data_len` random bytes.
pub fn keepalive_message(data_len: usize) -> Message {
    use rand::RngCore;

    let mut data = vec![0u8; data_len];
    rand::thread_rng().fill_bytes(&mut data);
    Message::Ignore { data }
}
