//! One-shot result slots for requests that complete asynchronously.
//!
//! Every operation whose answer arrives later on the receive loop (a channel
//! open, a channel request with `want_reply`, a global request, a service
//! request, an authentication attempt, a re-key) hands the caller a
//! [`PendingWait`]. The engine keeps the sending half in a
//! [`WaitRegistry`] and resolves it exactly once.
//!
//! A wait resolves when:
//!
//! - the awaited reply arrives ([`WaitResult::Succeeded`] or
//!   [`WaitResult::Failed`]),
//! - the session tears down ([`WaitResult::Disconnected`]), or
//! - the caller's own timeout expires ([`WaitResult::TimedOut`]). A timeout
//!   does not consume the wait, so the caller may wait again.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use conduit_proto::ssh::wait::{PendingWait, WaitResult};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut wait = PendingWait::ready(WaitResult::Succeeded(7u32));
//! assert!(matches!(wait.wait(Some(Duration::from_secs(1))).await, WaitResult::Succeeded(7)));
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use conduit_platform::{ConduitError, ConduitResult};
use once_cell::sync::OnceCell;
use tokio::sync::oneshot;

use super::message::DisconnectReason;
use super::session::{DisconnectInfo, DisconnectOrigin};

/// Where the session records why it ended. Shared by every wait so a dropped
/// sender can still report the real cause.
pub(crate) type DisconnectRecord = Arc<OnceCell<DisconnectInfo>>;

/// Outcome of a [`PendingWait`].
#[derive(Debug, Clone)]
pub enum WaitResult<T> {
    /// The awaited event happened
    Succeeded(T),
    /// The peer answered with a failure
    Failed(ConduitError),
    /// The caller's timeout expired first
    TimedOut,
    /// The session ended before the event happened
    Disconnected(DisconnectInfo),
}

impl<T> WaitResult<T> {
    /// Converts into a `Result`.
    ///
    /// `TimedOut` becomes [`ConduitError::TimedOut`]. `Disconnected` becomes
    /// [`ConduitError::PeerDisconnected`] when the peer ended the session,
    /// the error that caused teardown when there was one, and
    /// [`ConduitError::NotConnected`] otherwise.
    pub fn into_result(self) -> ConduitResult<T> {
        match self {
            WaitResult::Succeeded(value) => Ok(value),
            WaitResult::Failed(err) => Err(err),
            WaitResult::TimedOut => Err(ConduitError::TimedOut),
            WaitResult::Disconnected(info) => Err(info.into_error()),
        }
    }

    /// Whether this is [`WaitResult::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, WaitResult::Succeeded(_))
    }
}

/// Caller half of a one-shot result slot.
#[derive(Debug)]
pub struct PendingWait<T> {
    receiver: Option<oneshot::Receiver<WaitResult<T>>>,
    cached: Option<WaitResult<T>>,
    record: Option<DisconnectRecord>,
}

impl<T: Clone> PendingWait<T> {
    /// A wait that is already resolved.
    pub fn ready(result: WaitResult<T>) -> Self {
        Self {
            receiver: None,
            cached: Some(result),
            record: None,
        }
    }

    fn pending(receiver: oneshot::Receiver<WaitResult<T>>, record: DisconnectRecord) -> Self {
        Self {
            receiver: Some(receiver),
            cached: None,
            record: Some(record),
        }
    }

    /// Whether the result is already known.
    pub fn is_resolved(&mut self) -> bool {
        if self.cached.is_some() {
            return true;
        }
        if let Some(receiver) = self.receiver.as_mut() {
            match receiver.try_recv() {
                Ok(result) => self.store(result),
                Err(oneshot::error::TryRecvError::Empty) => return false,
                Err(oneshot::error::TryRecvError::Closed) => {
                    let result = self.dropped();
                    self.store(result);
                }
            }
        }
        self.cached.is_some()
    }

    /// Waits for the result, at most `timeout` if one is given.
    ///
    /// Once resolved, every later call returns the same result.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> WaitResult<T> {
        if let Some(result) = &self.cached {
            return result.clone();
        }

        let Some(receiver) = self.receiver.as_mut() else {
            return self.dropped();
        };

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => return WaitResult::TimedOut,
            },
            None => receiver.await,
        };

        let result = match received {
            Ok(result) => result,
            Err(_) => self.dropped(),
        };
        self.store(result.clone());
        result
    }

    /// Waits and converts with [`WaitResult::into_result`].
    pub async fn result(&mut self, timeout: Option<Duration>) -> ConduitResult<T> {
        self.wait(timeout).await.into_result()
    }

    fn store(&mut self, result: WaitResult<T>) {
        self.cached = Some(result);
        self.receiver = None;
    }

    // The registry dropped the sender without resolving it.
    fn dropped(&self) -> WaitResult<T> {
        let info = self
            .record
            .as_ref()
            .and_then(|r| r.get().cloned())
            .unwrap_or_else(|| {
                DisconnectInfo::new(
                    DisconnectOrigin::Local,
                    DisconnectReason::ByApplication.code(),
                    "session dropped",
                )
            });
        WaitResult::Disconnected(info)
    }
}

struct RegistryInner<K, T> {
    slots: BTreeMap<K, oneshot::Sender<WaitResult<T>>>,
    closed: Option<DisconnectInfo>,
}

/// Engine half: open slots keyed by request identity.
///
/// Keys are ordered, so registries keyed by an increasing counter resolve
/// in FIFO order with [`WaitRegistry::resolve_first`].
pub(crate) struct WaitRegistry<K, T> {
    inner: Mutex<RegistryInner<K, T>>,
    record: DisconnectRecord,
}

impl<K, T> WaitRegistry<K, T>
where
    K: Ord + Clone + std::fmt::Debug,
    T: Clone,
{
    pub(crate) fn new(record: DisconnectRecord) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                slots: BTreeMap::new(),
                closed: None,
            }),
            record,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner<K, T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a slot for `key`.
    ///
    /// After [`WaitRegistry::close`] the returned wait is already
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// [`ConduitError::Config`] if a wait for `key` is already open.
    pub(crate) fn register(&self, key: K) -> ConduitResult<PendingWait<T>> {
        let mut inner = self.lock();
        if let Some(info) = &inner.closed {
            return Ok(PendingWait::ready(WaitResult::Disconnected(info.clone())));
        }
        if inner.slots.contains_key(&key) {
            return Err(ConduitError::Config(format!(
                "a wait for {:?} is already outstanding",
                key
            )));
        }
        let (tx, rx) = oneshot::channel();
        inner.slots.insert(key, tx);
        Ok(PendingWait::pending(rx, Arc::clone(&self.record)))
    }

    /// Resolves the slot for `key`. Returns false if there was none.
    pub(crate) fn resolve(&self, key: &K, result: WaitResult<T>) -> bool {
        let sender = self.lock().slots.remove(key);
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Like [`resolve`](Self::resolve), but hands `result` back when nobody
    /// can receive it: no slot, or the caller dropped its wait.
    pub(crate) fn deliver(&self, key: &K, result: WaitResult<T>) -> Result<(), WaitResult<T>> {
        let sender = self.lock().slots.remove(key);
        match sender {
            Some(tx) => tx.send(result),
            None => Err(result),
        }
    }

    /// Resolves the lowest-keyed slot accepted by `filter`.
    pub(crate) fn resolve_first_where<F>(&self, filter: F, result: WaitResult<T>) -> bool
    where
        F: Fn(&K) -> bool,
    {
        let sender = {
            let mut inner = self.lock();
            let key = inner.slots.keys().find(|k| filter(k)).cloned();
            key.and_then(|k| inner.slots.remove(&k))
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Resolves the lowest-keyed slot.
    pub(crate) fn resolve_first(&self, result: WaitResult<T>) -> bool {
        self.resolve_first_where(|_| true, result)
    }

    /// Resolves every open slot with the same result.
    pub(crate) fn resolve_all(&self, result: WaitResult<T>) -> usize {
        let slots = std::mem::take(&mut self.lock().slots);
        let count = slots.len();
        for (_, tx) in slots {
            let _ = tx.send(result.clone());
        }
        count
    }

    /// Drops the slot for `key` without resolving it.
    pub(crate) fn cancel(&self, key: &K) {
        self.lock().slots.remove(key);
    }

    /// Resolves everything with `Disconnected` and refuses new slots.
    pub(crate) fn close(&self, info: &DisconnectInfo) -> usize {
        self.lock().closed = Some(info.clone());
        self.resolve_all(WaitResult::Disconnected(info.clone()))
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().slots.len()
    }
}
