use rooms::RoomHandle;
use shared::protocol::{events, LivingCellsUpdatedPayload, SetupClientEnvPayload};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{log_emit, ApiContext};

pub fn spawn(ctx: ApiContext, room_name: String, epoch: u64) -> JoinHandle<()> {
    tokio::spawn(async move { run(ctx, room_name, epoch).await })
}

async fn run(ctx: ApiContext, room_name: String, epoch: u64) {
    let Some(handle) = ctx.registry.room(&room_name).await else {
        return;
    };
    let mut ticker = time::interval(ctx.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !tick(&ctx, &handle, &room_name, epoch).await {
            break;
        }
    }
    info!(room = %room_name, epoch, "simulation loop exited");
}

/// Runs one generation. Returns `false` once the loop should stop.
pub async fn tick(ctx: &ApiContext, handle: &RoomHandle, room_name: &str, epoch: u64) -> bool {
    let mut room = handle.lock().await;
    if !room.is_running() || room.epoch() != epoch {
        return false;
    }
    if !room.is_running_eligible() {
        room.stop();
        return false;
    }

    let generation = room.advance();
    let frame = room.simulation_frame();
    let update = LivingCellsUpdatedPayload {
        room_name: room_name.to_string(),
        cells: room.current_living_cells(),
        simulation_frame: Some(frame),
    };
    log_emit(
        room_name,
        ctx.hub
            .room::<events::LivingCellsUpdated>(room_name)
            .emit(&update),
    );
    if generation.grown {
        let dimension = room.dimension();
        debug!(room = room_name, frame, ?dimension, "board grew");
        log_emit(
            room_name,
            ctx.hub
                .room::<events::SetupClientEnv>(room_name)
                .emit(&SetupClientEnvPayload { dimension }),
        );
    }
    debug!(
        room = room_name,
        frame,
        born = generation.born.len(),
        died = generation.died.len(),
        "generation"
    );
    true
}

#[cfg(test)]
#[path = "tests/simulation_tests.rs"]
mod tests;
