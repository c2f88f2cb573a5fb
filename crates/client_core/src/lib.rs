use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use event_channel::{Binding, Connection, Inbound};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{ConnectionId, Dimension, Member, Position, RoomStatus},
    protocol::{
        events, Envelope, Event, EventName, LeaveRoomPayload, LivingCellsPayload,
        LivingCellsUpdatedPayload, RequestSimulationPayload, RoomJoinedPayload,
        RoomLeavedPayload, RoomNamePayload, RoomNamesPayload, SetupClientEnvPayload,
    },
};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    pub room_name: String,
    pub me: Member,
    pub status: RoomStatus,
    pub dimension: Dimension,
}

impl RoomView {
    pub fn is_player(&self) -> bool {
        self.me.is_player()
    }
}

struct Transport {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Transport {
    fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct ClientInner {
    ws_url: Url,
    conn: Connection,
    room: Arc<Mutex<Option<RoomView>>>,
    transport: tokio::sync::Mutex<Option<Transport>>,
    generations: Binding<events::LivingCellsUpdated>,
}

#[derive(Clone)]
pub struct GameClient {
    inner: Arc<ClientInner>,
}

impl GameClient {
    pub async fn connect(server_url: &str) -> Result<Self> {
        let ws_url = ws_url(server_url)?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let conn = Connection::new(ConnectionId::random(), outbound);

        let client = Self {
            inner: Arc::new(ClientInner {
                ws_url,
                room: Arc::new(Mutex::new(None)),
                transport: tokio::sync::Mutex::new(None),
                generations: conn.bind_buffered::<events::LivingCellsUpdated>(),
                conn,
            }),
        };
        client.attach(outbound_rx).await?;
        Ok(client)
    }

    /// Replaces the websocket. Bindings are kept, but the server sees a brand new
    /// connection, so room membership has to be re-established by the caller. A closed
    /// client stays closed.
    pub async fn reconnect(&self) -> Result<()> {
        if self.inner.conn.is_closed() {
            bail!("client is closed");
        }
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.inner.conn.reattach(outbound);
        *self.room() = None;
        self.attach(outbound_rx).await
    }

    async fn attach(&self, mut outbound_rx: mpsc::UnboundedReceiver<Envelope>) -> Result<()> {
        let ws_url = &self.inner.ws_url;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let writer = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&envelope) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let conn = self.inner.conn.clone();
        let room = Arc::clone(&self.inner.room);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            observe(&room, &envelope);
                            conn.dispatch(envelope);
                        }
                        Err(err) => warn!(%err, "dropping malformed frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "websocket read failed");
                        break;
                    }
                }
            }
            debug!(connection = %conn.id(), "websocket reader stopped");
        });

        let previous = self
            .inner
            .transport
            .lock()
            .await
            .replace(Transport { reader, writer });
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(url = %ws_url, "connected");
        Ok(())
    }

    /// Terminal: pending waits fail and `reconnect` is refused afterwards.
    pub async fn close(&self) {
        if let Some(transport) = self.inner.transport.lock().await.take() {
            transport.abort();
        }
        self.inner.conn.close();
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    pub fn bind<E: Event>(&self) -> Binding<E> {
        self.inner.conn.bind::<E>()
    }

    fn room(&self) -> MutexGuard<'_, Option<RoomView>> {
        self.inner.room.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_room(&self) -> Option<RoomView> {
        self.room().clone()
    }

    pub async fn room_names(&self) -> Result<Vec<String>> {
        let reply = self
            .request::<events::GetRoomNames, events::RoomNamesUpdated>(
                &Default::default(),
                |_| true,
            )
            .await?;
        Ok(reply.room_names)
    }

    pub async fn create_room(&self, room_name: &str) -> Result<RoomJoinedPayload> {
        self.enter::<events::CreateRoom>(room_name).await
    }

    pub async fn join_room(&self, room_name: &str) -> Result<RoomJoinedPayload> {
        self.enter::<events::JoinRoom>(room_name).await
    }

    async fn enter<E>(&self, room_name: &str) -> Result<RoomJoinedPayload>
    where
        E: Event<Payload = RoomNamePayload>,
    {
        let payload = RoomNamePayload {
            room_name: room_name.to_string(),
        };
        // deltas for the room we are still in can arrive first
        self.request::<E, events::RoomJoined>(&payload, |joined| {
            joined.room_name == room_name && joined.room_status.is_some()
        })
        .await
    }

    async fn request<Q: Event, R: Event>(
        &self,
        payload: &Q::Payload,
        accept: impl Fn(&R::Payload) -> bool,
    ) -> Result<R::Payload> {
        let mut inbound = self.inner.conn.subscribe();
        self.bind::<Q>().emit(payload)?;

        timeout(REQUEST_TIMEOUT, reply::<Q, R>(&mut inbound, accept))
            .await
            .map_err(|_| anyhow!("no reply to {}", Q::NAME))?
    }

    pub fn leave_room(&self) -> Result<()> {
        let room_name = self.current_room().map(|view| view.room_name);
        self.bind::<events::LeaveRoom>()
            .emit(&LeaveRoomPayload { room_name })?;
        Ok(())
    }

    pub fn add_living_cells(&self, positions: Vec<Position>) -> Result<()> {
        let payload = self.edit(positions)?;
        self.bind::<events::AddLivingCells>().emit(&payload)?;
        Ok(())
    }

    pub fn remove_living_cells(&self, positions: Vec<Position>) -> Result<()> {
        let payload = self.edit(positions)?;
        self.bind::<events::RemoveLivingCells>().emit(&payload)?;
        Ok(())
    }

    fn edit(&self, position: Vec<Position>) -> Result<LivingCellsPayload> {
        let view = self.player_view()?;
        Ok(LivingCellsPayload {
            player_id: view.me.id().clone(),
            room_name: view.room_name,
            position,
        })
    }

    pub fn request_simulation(&self, request: bool) -> Result<()> {
        let view = self.player_view()?;
        self.bind::<events::RequestSimulation>()
            .emit(&RequestSimulationPayload {
                player_id: view.me.id().clone(),
                room_name: view.room_name,
                request_simulation: request,
            })?;
        Ok(())
    }

    fn player_view(&self) -> Result<RoomView> {
        let Some(view) = self.current_room() else {
            bail!("not in a room");
        };
        if !view.is_player() {
            bail!("guests cannot edit or vote in '{}'", view.room_name);
        }
        Ok(view)
    }

    /// Buffered stream of board updates: edits and generations alike, none dropped.
    pub fn generations(&self) -> &Binding<events::LivingCellsUpdated> {
        &self.inner.generations
    }

    pub async fn next_generation(&self) -> Result<LivingCellsUpdatedPayload> {
        Ok(self.inner.generations.next().await?)
    }
}

// Only an `invalid-payload` naming `Q` fails the request.
async fn reply<Q: Event, R: Event>(
    inbound: &mut Inbound,
    accept: impl Fn(&R::Payload) -> bool,
) -> Result<R::Payload> {
    loop {
        let (event, value) = inbound.recv().await?;
        if event == R::NAME {
            let reply =
                R::decode(value).with_context(|| format!("malformed {event} from server"))?;
            if accept(&reply) {
                return Ok(reply);
            }
        } else if event == EventName::InvalidPayload {
            let rejected = events::InvalidPayload::decode(value)
                .with_context(|| format!("malformed {event} from server"))?;
            if rejected.event_name == Q::NAME.as_str() {
                bail!("server rejected {} payload", rejected.event_name);
            }
        }
    }
}

fn ws_url(server_url: &str) -> Result<Url> {
    let mut url =
        Url::parse(server_url).with_context(|| format!("invalid server url: {server_url}"))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("unsupported scheme '{other}' in {server_url}"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot use scheme {scheme} for {server_url}"))?;
    url.set_path("/ws");
    Ok(url)
}

/// Folds room lifecycle events into the local room view before they are dispatched.
fn observe(room: &Mutex<Option<RoomView>>, envelope: &Envelope) {
    let Ok(name) = envelope.event_name() else {
        return;
    };
    let mut room = room.lock().unwrap_or_else(PoisonError::into_inner);
    match name {
        EventName::RoomJoined => {
            let Ok(joined) = decode::<events::RoomJoined>(envelope) else {
                return;
            };
            match (joined.new_user, joined.room_status) {
                (Some(me), Some(status)) => {
                    *room = Some(RoomView {
                        room_name: joined.room_name,
                        me,
                        status,
                        dimension: Dimension::default(),
                    });
                }
                (Some(entrant), None) => {
                    if let Some(view) = room.as_mut().filter(|v| v.room_name == joined.room_name) {
                        view.status.insert(entrant);
                    }
                }
                _ => {}
            }
        }
        EventName::RoomLeaved => {
            let Ok(RoomLeavedPayload {
                room_name,
                leaved_user,
            }) = decode::<events::RoomLeaved>(envelope)
            else {
                return;
            };
            let leaving_me = room
                .as_ref()
                .is_some_and(|v| v.room_name == room_name && v.me.id() == &leaved_user.id);
            if leaving_me {
                *room = None;
            } else if let Some(view) = room.as_mut().filter(|v| v.room_name == room_name) {
                view.status.remove(&leaved_user.id);
            }
        }
        EventName::RequestSimulationUpdated => {
            if let Ok(vote) = decode::<events::RequestSimulationUpdated>(envelope) {
                if let Some(view) = room.as_mut().filter(|v| v.room_name == vote.room_name) {
                    view.status
                        .set_vote(&vote.player_id, vote.request_simulation);
                }
            }
        }
        EventName::SetupClientEnv => {
            if let Ok(SetupClientEnvPayload { dimension }) =
                decode::<events::SetupClientEnv>(envelope)
            {
                if let Some(view) = room.as_mut() {
                    view.dimension = dimension;
                }
            }
        }
        EventName::RoomNamesUpdated => {
            if let Ok(RoomNamesPayload { room_names }) =
                decode::<events::RoomNamesUpdated>(envelope)
            {
                debug!(rooms = room_names.len(), "room list updated");
            }
        }
        _ => {}
    }
}

fn decode<E: Event>(envelope: &Envelope) -> Result<E::Payload, serde_json::Error> {
    E::decode(envelope.payload.clone())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
