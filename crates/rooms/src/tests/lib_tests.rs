use super::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use shared::{
    domain::{Member, Position, SimulationState},
    error::ErrorCode,
};

fn rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(42)
}

fn id(value: &str) -> ConnectionId {
    ConnectionId::from(value)
}

#[tokio::test]
async fn create_room_is_idempotent_and_names_are_sorted() {
    let registry = RoomRegistry::new();
    assert!(registry.create_room("zeta").await);
    assert!(registry.create_room("alpha").await);
    assert!(!registry.create_room("zeta").await);

    assert_eq!(registry.room_names().await, vec!["alpha", "zeta"]);
    assert_eq!(registry.room_count().await, 2);
    assert!(registry.room("alpha").await.is_some());
    assert!(registry.room("missing").await.is_none());
}

#[tokio::test]
async fn membership_index_tracks_one_room_per_connection() {
    let registry = RoomRegistry::new();
    let alice = id("alice");

    assert_eq!(registry.assign_member(&alice, "one").await, None);
    assert_eq!(
        registry.assign_member(&alice, "two").await,
        Some("one".to_string())
    );
    assert_eq!(
        registry.find_room_by_member(&alice).await,
        Some("two".to_string())
    );

    assert!(!registry.release_member(&alice, "one").await);
    assert!(registry.release_member(&alice, "two").await);
    assert_eq!(registry.find_room_by_member(&alice).await, None);
}

#[tokio::test]
async fn room_handles_are_shared_between_clones() {
    let registry = RoomRegistry::new();
    registry.create_room("lobby").await;
    let other = registry.clone();

    let handle = registry.room("lobby").await.expect("room");
    handle.lock().await.join(id("alice"), &mut rng());

    let seen = other.room("lobby").await.expect("room");
    assert_eq!(seen.lock().await.players().len(), 1);
}

#[test]
fn joiners_are_players_until_the_room_runs() {
    let mut room = Room::new("lobby");
    let mut rng = rng();

    let alice = room.join(id("alice"), &mut rng);
    let player = alice.as_player().expect("player");
    assert!(player.appearance.is_player_color());
    assert!(!player.request_start_simulation);

    room.set_vote(&id("alice"), true).expect("vote");
    room.start();
    let bob = room.join(id("bob"), &mut rng);
    assert_eq!(bob, Member::Guest(shared::domain::Guest { id: id("bob") }));

    let status = room.status();
    assert_eq!(status.players.len(), 1);
    assert_eq!(status.guests.len(), 1);
}

#[test]
fn joining_twice_keeps_one_entry() {
    let mut room = Room::new("lobby");
    let mut rng = rng();
    let first = room.join(id("alice"), &mut rng);
    let second = room.join(id("alice"), &mut rng);
    assert_eq!(first, second);
    assert_eq!(room.players().len(), 1);
}

#[test]
fn roster_keeps_join_order() {
    let mut room = Room::new("lobby");
    let mut rng = rng();
    for name in ["c", "a", "b"] {
        room.join(id(name), &mut rng);
    }
    let ids: Vec<_> = room.players().iter().map(|p| p.id.0.as_str()).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);

    assert!(room.leave(&id("a")).is_some());
    assert!(room.leave(&id("a")).is_none());
    let ids: Vec<_> = room.players().iter().map(|p| p.id.0.as_str()).collect();
    assert_eq!(ids, vec!["c", "b"]);
}

#[test]
fn eligibility_needs_every_player_and_at_least_one() {
    let mut room = Room::new("lobby");
    assert!(!room.is_running_eligible());
    assert_eq!(room.state(), SimulationState::Idle);

    let mut rng = rng();
    room.join(id("alice"), &mut rng);
    room.join(id("bob"), &mut rng);

    room.set_vote(&id("alice"), true).expect("vote");
    assert!(!room.is_running_eligible());
    assert_eq!(room.state(), SimulationState::WaitingForUnanimity);

    room.set_vote(&id("bob"), true).expect("vote");
    assert!(room.is_running_eligible());

    room.leave(&id("alice"));
    assert!(room.is_running_eligible());
    room.leave(&id("bob"));
    assert!(!room.is_running_eligible());
}

#[test]
fn guests_and_strangers_cannot_vote() {
    let mut room = Room::new("lobby");
    let mut rng = rng();
    room.join(id("alice"), &mut rng);
    room.set_vote(&id("alice"), true).expect("vote");
    room.start();
    room.join(id("bob"), &mut rng);

    let err = room.set_vote(&id("bob"), true).expect_err("guest vote");
    assert_eq!(err.code, ErrorCode::CapabilityViolation);
    let err = room.set_vote(&id("carol"), true).expect_err("stranger vote");
    assert_eq!(err.code, ErrorCode::NotAMember);
}

#[test]
fn edits_use_the_players_color_and_lock_while_running() {
    let mut room = Room::new("lobby");
    let mut rng = rng();
    let alice = room.join(id("alice"), &mut rng);
    let color = alice.as_player().expect("player").appearance;

    let added = room
        .add_living_cells(
            &id("alice"),
            &[Position::new(1, 1), Position::new(2, 2), Position::new(-1, 3)],
        )
        .expect("add");
    assert_eq!(added, 2);
    assert!(room
        .current_living_cells()
        .iter()
        .all(|cell| cell.appearance == color));

    room.set_vote(&id("alice"), true).expect("vote");
    room.start();
    let err = room
        .add_living_cells(&id("alice"), &[Position::new(5, 5)])
        .expect_err("locked");
    assert_eq!(err.code, ErrorCode::CapabilityViolation);
    let err = room
        .remove_living_cells(&id("alice"), &[Position::new(1, 1)])
        .expect_err("locked");
    assert_eq!(err.code, ErrorCode::CapabilityViolation);
    assert_eq!(room.current_living_cells().len(), 2);

    room.stop();
    let removed = room
        .remove_living_cells(&id("alice"), &[Position::new(1, 1), Position::new(9, 9)])
        .expect("remove");
    assert_eq!(removed, 1);
    assert!(!room.engine().is_alive(Position::new(1, 1)));
}

#[test]
fn guests_cannot_edit() {
    let mut room = Room::new("lobby");
    let err = room
        .add_living_cells(&id("nobody"), &[Position::new(1, 1)])
        .expect_err("not a player");
    assert_eq!(err.code, ErrorCode::CapabilityViolation);
    assert!(room.current_living_cells().is_empty());
}

#[test]
fn start_resets_the_frame_and_bumps_the_epoch() {
    let mut room = Room::new("lobby");
    let mut rng = rng();
    room.join(id("alice"), &mut rng);
    room.add_living_cells(
        &id("alice"),
        &[Position::new(1, 0), Position::new(1, 1), Position::new(1, 2)],
    )
    .expect("blinker");

    let first = room.start();
    room.advance();
    room.advance();
    assert_eq!(room.simulation_frame(), 2);

    room.stop();
    assert_eq!(room.state(), SimulationState::Idle);
    let second = room.start();
    assert!(second > first);
    assert_eq!(room.simulation_frame(), 0);
    assert_eq!(room.epoch(), second);
    assert_eq!(room.state(), SimulationState::Running);
}
