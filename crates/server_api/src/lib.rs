use std::time::Duration;

use event_channel::{ChannelError, Connection, Hub};
use rooms::{Room, RoomRegistry};
use serde_json::Value;
use shared::{
    domain::ConnectionId,
    error::{CoreError, ErrorCode},
    protocol::{
        events, Envelope, Event, EventName, InvalidPayloadPayload, LeaveRoomPayload, LeavedUser,
        LivingCellsPayload, LivingCellsUpdatedPayload, RequestSimulationPayload,
        RoomJoinedPayload, RoomLeavedPayload, RoomNamePayload, RoomNamesPayload,
        SetupClientEnvPayload,
    },
};
use tracing::{debug, info, warn};

pub mod simulation;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct ApiContext {
    pub registry: RoomRegistry,
    pub hub: Hub,
    pub tick_interval: Duration,
}

impl Default for ApiContext {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl ApiContext {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            registry: RoomRegistry::new(),
            hub: Hub::new(),
            tick_interval,
        }
    }
}

pub async fn connect(ctx: &ApiContext, conn: &Connection) {
    ctx.hub.register(conn.clone());
    info!(connection = %conn.id(), "connection opened");
    if let Err(err) = send_room_names(ctx, conn).await {
        debug!(connection = %conn.id(), %err, "room list not delivered");
    }
}

pub async fn disconnect(ctx: &ApiContext, conn: &Connection) {
    let id = conn.id().clone();
    conn.close();
    if let Some(room_name) = ctx.registry.find_room_by_member(&id).await {
        if let Err(err) = leave(ctx, &id, &room_name).await {
            debug!(connection = %id, room = %room_name, %err, "implicit leave skipped");
        }
    }
    ctx.hub.unregister(&id);
    info!(connection = %id, "connection closed");
}

pub async fn dispatch(ctx: &ApiContext, conn: &Connection, envelope: Envelope) {
    let name = match envelope.event_name() {
        Ok(name) => name,
        Err(err) => {
            debug!(connection = %conn.id(), %err, "ignoring frame");
            return;
        }
    };

    let Err(err) = route(ctx, conn, name, envelope.payload).await else {
        return;
    };
    if err.code.is_reported() {
        debug!(connection = %conn.id(), event = %name, "rejecting malformed payload");
        let reply = InvalidPayloadPayload {
            event_name: name.as_str().to_string(),
        };
        if let Err(err) = conn.bind::<events::InvalidPayload>().emit(&reply) {
            debug!(connection = %conn.id(), %err, "invalid-payload not delivered");
        }
    } else {
        debug!(connection = %conn.id(), event = %name, %err, "request ignored");
    }
}

async fn route(
    ctx: &ApiContext,
    conn: &Connection,
    name: EventName,
    payload: Value,
) -> Result<(), CoreError> {
    match name {
        EventName::CreateRoom => create_room(ctx, conn, decode::<events::CreateRoom>(payload)?).await,
        EventName::JoinRoom => join_room(ctx, conn, decode::<events::JoinRoom>(payload)?).await,
        EventName::LeaveRoom => leave_room(ctx, conn, decode::<events::LeaveRoom>(payload)?).await,
        EventName::GetRoomNames => {
            decode::<events::GetRoomNames>(payload)?;
            send_room_names(ctx, conn).await
        }
        EventName::AddLivingCells => {
            add_living_cells(ctx, conn, decode::<events::AddLivingCells>(payload)?).await
        }
        EventName::RemoveLivingCells => {
            remove_living_cells(ctx, conn, decode::<events::RemoveLivingCells>(payload)?).await
        }
        EventName::RequestSimulation => {
            request_simulation(ctx, conn, decode::<events::RequestSimulation>(payload)?).await
        }
        other => {
            debug!(connection = %conn.id(), event = %other, "server-only event from client");
            Ok(())
        }
    }
}

fn decode<E: Event>(payload: Value) -> Result<E::Payload, CoreError> {
    E::decode(payload).map_err(|_| CoreError::malformed(E::NAME))
}

pub async fn create_room(
    ctx: &ApiContext,
    conn: &Connection,
    payload: RoomNamePayload,
) -> Result<(), CoreError> {
    if ctx.registry.create_room(&payload.room_name).await {
        info!(room = %payload.room_name, connection = %conn.id(), "room created");
        let names = RoomNamesPayload {
            room_names: ctx.registry.room_names().await,
        };
        log_emit(
            &payload.room_name,
            ctx.hub.broadcast::<events::RoomNamesUpdated>(&names),
        );
    }
    join_room(ctx, conn, payload).await
}

pub async fn join_room(
    ctx: &ApiContext,
    conn: &Connection,
    payload: RoomNamePayload,
) -> Result<(), CoreError> {
    let room_name = payload.room_name;
    let handle = ctx
        .registry
        .room(&room_name)
        .await
        .ok_or_else(|| CoreError::unknown_room(&room_name))?;
    let id = conn.id().clone();

    let previous = ctx.registry.find_room_by_member(&id).await;
    // a repeat join keeps role and vote; only the joiner's snapshot goes out again
    let rejoin = previous.as_deref() == Some(room_name.as_str());
    if let Some(previous) = previous.filter(|_| !rejoin) {
        leave(ctx, &id, &previous).await?;
    }

    let mut room = handle.lock().await;
    let member = room.join(id.clone(), &mut rand::thread_rng());
    ctx.registry.assign_member(&id, &room_name).await;
    ctx.hub.join(&room_name, &id);
    info!(room = %room_name, connection = %id, player = member.is_player(), "member joined");

    if !rejoin {
        let delta = RoomJoinedPayload {
            room_name: room_name.clone(),
            new_user: Some(member.clone()),
            room_status: None,
        };
        log_emit(
            &room_name,
            ctx.hub
                .room::<events::RoomJoined>(&room_name)
                .emit_except(&delta, &id),
        );
    }

    let snapshot = RoomJoinedPayload {
        room_name: room_name.clone(),
        new_user: Some(member),
        room_status: Some(room.status()),
    };
    log_emit(&room_name, conn.bind::<events::RoomJoined>().emit(&snapshot));
    log_emit(
        &room_name,
        conn.bind::<events::SetupClientEnv>()
            .emit(&SetupClientEnvPayload {
                dimension: room.dimension(),
            }),
    );
    log_emit(
        &room_name,
        conn.bind::<events::LivingCellsUpdated>()
            .emit(&board(&room, None)),
    );
    Ok(())
}

pub async fn leave_room(
    ctx: &ApiContext,
    conn: &Connection,
    payload: LeaveRoomPayload,
) -> Result<(), CoreError> {
    let current = ctx.registry.find_room_by_member(conn.id()).await;
    let room_name = match (payload.room_name, current) {
        (Some(named), Some(current)) if named == current => current,
        (None, Some(current)) => current,
        (Some(named), _) => {
            return Err(CoreError::not_a_member(format!(
                "{} is not in `{named}`",
                conn.id()
            )))
        }
        (None, None) => {
            return Err(CoreError::not_a_member(format!("{} is in no room", conn.id())))
        }
    };
    leave(ctx, conn.id(), &room_name).await
}

pub async fn leave(ctx: &ApiContext, id: &ConnectionId, room_name: &str) -> Result<(), CoreError> {
    let handle = ctx
        .registry
        .room(room_name)
        .await
        .ok_or_else(|| CoreError::unknown_room(room_name))?;
    let mut room = handle.lock().await;
    let left = room.leave(id);
    ctx.registry.release_member(id, room_name).await;
    if left.is_none() {
        ctx.hub.leave(room_name, id);
        return Err(CoreError::not_a_member(format!(
            "{id} is not in `{room_name}`"
        )));
    }

    let notice = RoomLeavedPayload {
        room_name: room_name.to_string(),
        leaved_user: LeavedUser { id: id.clone() },
    };
    log_emit(
        room_name,
        ctx.hub.room::<events::RoomLeaved>(room_name).emit(&notice),
    );
    ctx.hub.leave(room_name, id);
    info!(room = room_name, connection = %id, "member left");

    reconcile(ctx, room_name, &mut room);
    Ok(())
}

pub async fn send_room_names(ctx: &ApiContext, conn: &Connection) -> Result<(), CoreError> {
    let names = RoomNamesPayload {
        room_names: ctx.registry.room_names().await,
    };
    conn.bind::<events::RoomNamesUpdated>()
        .emit(&names)
        .map_err(|err| CoreError::new(ErrorCode::ConnectionLost, err.to_string()))
}

pub async fn add_living_cells(
    ctx: &ApiContext,
    conn: &Connection,
    payload: LivingCellsPayload,
) -> Result<(), CoreError> {
    ensure_self(conn, &payload.player_id)?;
    let handle = ctx
        .registry
        .room(&payload.room_name)
        .await
        .ok_or_else(|| CoreError::unknown_room(&payload.room_name))?;
    let mut room = handle.lock().await;
    let added = room.add_living_cells(&payload.player_id, &payload.position)?;
    debug!(room = %payload.room_name, connection = %conn.id(), added, "cells added");
    broadcast_board(ctx, &room);
    Ok(())
}

pub async fn remove_living_cells(
    ctx: &ApiContext,
    conn: &Connection,
    payload: LivingCellsPayload,
) -> Result<(), CoreError> {
    ensure_self(conn, &payload.player_id)?;
    let handle = ctx
        .registry
        .room(&payload.room_name)
        .await
        .ok_or_else(|| CoreError::unknown_room(&payload.room_name))?;
    let mut room = handle.lock().await;
    let removed = room.remove_living_cells(&payload.player_id, &payload.position)?;
    debug!(room = %payload.room_name, connection = %conn.id(), removed, "cells removed");
    broadcast_board(ctx, &room);
    Ok(())
}

pub async fn request_simulation(
    ctx: &ApiContext,
    conn: &Connection,
    payload: RequestSimulationPayload,
) -> Result<(), CoreError> {
    ensure_self(conn, &payload.player_id)?;
    let handle = ctx
        .registry
        .room(&payload.room_name)
        .await
        .ok_or_else(|| CoreError::unknown_room(&payload.room_name))?;
    let mut room = handle.lock().await;
    room.set_vote(&payload.player_id, payload.request_simulation)?;
    debug!(
        room = %payload.room_name,
        connection = %conn.id(),
        vote = payload.request_simulation,
        "vote recorded"
    );
    log_emit(
        &payload.room_name,
        ctx.hub
            .room::<events::RequestSimulationUpdated>(&payload.room_name)
            .emit(&payload),
    );
    reconcile(ctx, &payload.room_name, &mut room);
    Ok(())
}

// caller holds the room lock
fn reconcile(ctx: &ApiContext, room_name: &str, room: &mut Room) {
    if room.is_running() && !room.is_running_eligible() {
        room.stop();
        info!(room = room_name, frame = room.simulation_frame(), "simulation stopped");
    } else if !room.is_running() && room.is_running_eligible() {
        let epoch = room.start();
        info!(room = room_name, "simulation started");
        simulation::spawn(ctx.clone(), room_name.to_string(), epoch);
    }
}

fn ensure_self(conn: &Connection, player_id: &ConnectionId) -> Result<(), CoreError> {
    if conn.id() == player_id {
        Ok(())
    } else {
        Err(CoreError::capability(format!(
            "{} may not act for {player_id}",
            conn.id()
        )))
    }
}

fn board(room: &Room, simulation_frame: Option<u64>) -> LivingCellsUpdatedPayload {
    LivingCellsUpdatedPayload {
        room_name: room.name().to_string(),
        cells: room.current_living_cells(),
        simulation_frame,
    }
}

fn broadcast_board(ctx: &ApiContext, room: &Room) {
    log_emit(
        room.name(),
        ctx.hub
            .room::<events::LivingCellsUpdated>(room.name())
            .emit(&board(room, None)),
    );
}

fn log_emit<T>(room_name: &str, result: Result<T, ChannelError>) {
    if let Err(err) = result {
        warn!(room = room_name, %err, "emit failed");
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
