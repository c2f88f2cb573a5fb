use std::{
    collections::HashMap,
    future::Future,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use shared::{
    domain::ConnectionId,
    protocol::{Envelope, Event, EventName},
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace};

use crate::{
    channel::{EventChannel, Waiter},
    error::ChannelError,
};

const TAP_CAPACITY: usize = 256;

struct ConnectionInner {
    id: ConnectionId,
    outbound: Mutex<mpsc::UnboundedSender<Envelope>>,
    channels: Mutex<HashMap<EventName, Arc<EventChannel>>>,
    tap: broadcast::Sender<(EventName, Value)>,
    closed: watch::Sender<bool>,
}

/// One side of a bidirectional link. Clones share the outbound queue and the channel registry.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                outbound: Mutex::new(outbound),
                channels: Mutex::new(HashMap::new()),
                tap,
                closed,
            }),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<EventName, Arc<EventChannel>>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self, name: EventName) -> Arc<EventChannel> {
        let mut channels = self.channels();
        Arc::clone(channels.entry(name).or_insert_with(|| {
            trace!(connection = %self.inner.id, event = %name, "binding event channel");
            Arc::new(EventChannel::new(name))
        }))
    }

    pub fn bind<E: Event>(&self) -> Binding<E> {
        Binding {
            connection: self.clone(),
            channel: self.channel(E::NAME),
            _event: PhantomData,
        }
    }

    /// Like [`Connection::bind`] but switches the channel into pile-up mode: payloads that
    /// arrive while nobody is waiting are queued instead of dropped.
    pub fn bind_buffered<E: Event>(&self) -> Binding<E> {
        let binding = self.bind::<E>();
        binding.channel.enable_buffering();
        binding
    }

    pub fn is_bound(&self, name: EventName) -> bool {
        self.channels().contains_key(&name)
    }

    pub fn bound_events(&self) -> Vec<EventName> {
        let mut names: Vec<EventName> = self.channels().keys().copied().collect();
        names.sort();
        names
    }

    /// Every delivered event also reaches the tap, bound or not.
    pub fn deliver(&self, name: EventName, payload: Value) -> bool {
        if self.is_closed() {
            return false;
        }
        let channel = self.channels().get(&name).cloned();
        let handled = match channel {
            Some(channel) => {
                channel.deliver(payload.clone());
                true
            }
            None => false,
        };
        let _ = self.inner.tap.send((name, payload));
        handled
    }

    pub fn dispatch(&self, envelope: Envelope) -> Option<EventName> {
        match envelope.event_name() {
            Ok(name) => {
                self.deliver(name, envelope.payload);
                Some(name)
            }
            Err(err) => {
                debug!(connection = %self.inner.id, %err, "dropping frame");
                None
            }
        }
    }

    pub fn send(&self, name: EventName, payload: Value) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Disconnected);
        }
        let outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outbound
            .send(Envelope::new(name, payload))
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Swaps in a fresh transport after a reconnect. The registry is left untouched, so every
    /// existing binding keeps working without being registered again.
    pub fn reattach(&self, outbound: mpsc::UnboundedSender<Envelope>) {
        let mut current = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = outbound;
        debug!(
            connection = %self.inner.id,
            bindings = self.channels().len(),
            "transport reattached"
        );
    }

    /// Tears the connection down: pending `next` futures fail with
    /// [`ChannelError::Disconnected`] and later emits are refused.
    pub fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        for channel in self.channels().values() {
            channel.cancel_waiters();
        }
        debug!(connection = %self.inner.id, "connection closed");
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    pub async fn closed(&self) {
        wait_closed(self.inner.closed.subscribe()).await;
    }

    /// Every payload delivered from now on, bound or not, in arrival order.
    pub fn subscribe(&self) -> Inbound {
        Inbound {
            tap: self.inner.tap.subscribe(),
            closed: self.inner.closed.subscribe(),
        }
    }
}

pub struct Inbound {
    tap: broadcast::Receiver<(EventName, Value)>,
    closed: watch::Receiver<bool>,
}

impl Inbound {
    pub async fn recv(&mut self) -> Result<(EventName, Value), ChannelError> {
        loop {
            tokio::select! {
                biased;
                received = self.tap.recv() => match received {
                    Ok(frame) => return Ok(frame),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "inbound subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(ChannelError::Disconnected),
                },
                _ = wait_closed(self.closed.clone()) => return Err(ChannelError::Disconnected),
            }
        }
    }
}

pub struct Binding<E: Event> {
    connection: Connection,
    channel: Arc<EventChannel>,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event> Clone for Binding<E> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            channel: Arc::clone(&self.channel),
            _event: PhantomData,
        }
    }
}

impl<E: Event> Binding<E> {
    pub fn name(&self) -> EventName {
        self.channel.name()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_buffered(&self) -> bool {
        self.channel.is_buffered()
    }

    pub fn buffered_len(&self) -> usize {
        self.channel.buffered_len()
    }

    pub fn latest(&self) -> Option<E::Payload> {
        self.channel
            .latest()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn emit(&self, payload: &E::Payload) -> Result<(), ChannelError> {
        let value = serde_json::to_value(payload).map_err(|source| ChannelError::Encode {
            event: E::NAME,
            source,
        })?;
        self.connection.send(E::NAME, value)
    }

    pub fn next(&self) -> impl Future<Output = Result<E::Payload, ChannelError>> + Send + 'static {
        self.next_or_abort(&[])
    }

    /// Waits for the next payload, failing early if any of `abort` arrives first.
    ///
    /// The waiter is registered before this returns, so a request may be emitted between the
    /// call and the first poll without losing the reply.
    pub fn next_or_abort(
        &self,
        abort: &[EventName],
    ) -> impl Future<Output = Result<E::Payload, ChannelError>> + Send + 'static {
        let tap = self.connection.inner.tap.subscribe();
        let closed = self.connection.inner.closed.subscribe();
        let slot = if self.connection.is_closed() {
            None
        } else {
            Some(self.channel.take_or_wait())
        };
        let abort = abort.to_vec();

        async move {
            let waiter = slot.ok_or(ChannelError::Disconnected)?;
            let value = wait(E::NAME, waiter, tap, closed, &abort).await?;
            serde_json::from_value(value).map_err(|source| ChannelError::Decode {
                event: E::NAME,
                source,
            })
        }
    }
}

async fn wait(
    expected: EventName,
    mut waiter: Waiter,
    mut tap: broadcast::Receiver<(EventName, Value)>,
    closed: watch::Receiver<bool>,
    abort: &[EventName],
) -> Result<Value, ChannelError> {
    let outcome = tokio::select! {
        biased;
        received = waiter.recv() => received.ok_or(ChannelError::Disconnected),
        _ = wait_closed(closed) => Err(ChannelError::Disconnected),
        (event, payload) = next_abort(&mut tap, abort) => {
            Err(ChannelError::Aborted { expected, event, payload })
        }
    };
    // requeues a payload handed over while an abort or close won the race
    drop(waiter);
    outcome
}

async fn next_abort(
    tap: &mut broadcast::Receiver<(EventName, Value)>,
    abort: &[EventName],
) -> (EventName, Value) {
    if abort.is_empty() {
        return std::future::pending().await;
    }
    loop {
        match tap.recv().await {
            Ok((event, payload)) if abort.contains(&event) => return (event, payload),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}
