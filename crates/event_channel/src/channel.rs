use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use shared::protocol::EventName;
use tokio::sync::oneshot;

/// A registered `next()`. Dropped before it has received, it hands back any payload that was
/// already sent to it.
pub(crate) struct Waiter {
    channel: Arc<EventChannel>,
    rx: oneshot::Receiver<Value>,
    received: bool,
}

impl Waiter {
    /// `None` once the sender is gone, i.e. the connection was closed.
    pub(crate) async fn recv(&mut self) -> Option<Value> {
        let value = (&mut self.rx).await.ok();
        self.received = true;
        value
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.received {
            self.channel.reclaim(&mut self.rx);
        }
    }
}

#[derive(Default)]
struct ChannelState {
    buffered: bool,
    queue: VecDeque<Value>,
    waiters: VecDeque<oneshot::Sender<Value>>,
    latest: Option<Value>,
}

/// Untyped delivery point for one event name on one connection.
pub(crate) struct EventChannel {
    name: EventName,
    state: Mutex<ChannelState>,
}

impl EventChannel {
    pub(crate) fn new(name: EventName) -> Self {
        Self {
            name,
            state: Mutex::new(ChannelState::default()),
        }
    }

    pub(crate) fn name(&self) -> EventName {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn enable_buffering(&self) {
        self.lock().buffered = true;
    }

    pub(crate) fn is_buffered(&self) -> bool {
        self.lock().buffered
    }

    /// Buffered channels hand each payload to exactly one waiter (oldest first) and queue it
    /// when nobody waits. Unbuffered channels hand it to every pending waiter and drop it
    /// otherwise.
    pub(crate) fn deliver(&self, payload: Value) {
        let mut state = self.lock();
        state.latest = Some(payload.clone());

        if state.buffered {
            let mut payload = payload;
            while let Some(waiter) = state.waiters.pop_front() {
                match waiter.send(payload) {
                    Ok(()) => return,
                    Err(returned) => payload = returned,
                }
            }
            state.queue.push_back(payload);
        } else {
            for waiter in state.waiters.drain(..) {
                let _ = waiter.send(payload.clone());
            }
        }
    }

    /// Registers a waiter. A queued payload is handed to it straight away.
    pub(crate) fn take_or_wait(self: &Arc<Self>) -> Waiter {
        let mut state = self.lock();
        let (tx, rx) = oneshot::channel();
        match state.queue.pop_front() {
            Some(payload) => {
                let _ = tx.send(payload);
            }
            None => {
                state.waiters.retain(|waiter| !waiter.is_closed());
                state.waiters.push_back(tx);
            }
        }
        Waiter {
            channel: Arc::clone(self),
            rx,
            received: false,
        }
    }

    /// A payload already handed to an abandoned waiter goes back to the front of the queue so
    /// that nothing is lost in buffered mode.
    fn reclaim(&self, rx: &mut oneshot::Receiver<Value>) {
        rx.close();
        if let Ok(payload) = rx.try_recv() {
            let mut state = self.lock();
            if state.buffered {
                state.queue.push_front(payload);
            }
        }
    }

    /// Drops every pending waiter; their futures resolve as disconnected.
    pub(crate) fn cancel_waiters(&self) {
        self.lock().waiters.clear();
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub(crate) fn latest(&self) -> Option<Value> {
        self.lock().latest.clone()
    }
}
