use super::*;
use event_channel::ChannelError;
use serde_json::json;
use server_api::ApiContext;
use shared::protocol::InvalidPayloadPayload;
use tokio::net::TcpListener;

async fn spawn_server(tick: Duration) -> Result<(String, ApiContext)> {
    let api = ApiContext::new(tick);
    let app = server::build_router(Arc::new(server::AppState { api: api.clone() }));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), api))
}

async fn next_frame(client: &GameClient) -> LivingCellsUpdatedPayload {
    timeout(Duration::from_secs(5), client.next_generation())
        .await
        .expect("generation in time")
        .expect("generation")
}

#[test]
fn ws_url_follows_the_http_scheme() {
    assert_eq!(
        ws_url("http://127.0.0.1:8443").expect("url").as_str(),
        "ws://127.0.0.1:8443/ws"
    );
    assert_eq!(
        ws_url("https://life.example.org").expect("url").as_str(),
        "wss://life.example.org/ws"
    );
    assert!(ws_url("ftp://life.example.org").is_err());
    assert!(ws_url("not a url").is_err());
}

#[test]
fn observe_tracks_roster_votes_and_departures() {
    let room = Mutex::new(None);
    let me = json!({ "id": "me", "appearance": { "hue": 1, "saturation": 2, "light": 40 }, "requestStartSimulation": false });
    observe(
        &room,
        &Envelope::new(
            EventName::RoomJoined,
            json!({ "roomName": "lobby", "newUser": me, "roomStatus": { "players": [me], "guests": [] } }),
        ),
    );
    observe(
        &room,
        &Envelope::new(
            EventName::RoomJoined,
            json!({ "roomName": "lobby", "newUser": { "id": "guest" }, "roomStatus": null }),
        ),
    );
    observe(
        &room,
        &Envelope::new(
            EventName::RequestSimulationUpdated,
            json!({ "playerId": "me", "roomName": "lobby", "requestSimulation": true }),
        ),
    );

    let view = room.lock().expect("lock").clone().expect("view");
    assert_eq!(view.status.guests.len(), 1);
    assert!(view.status.players[0].request_start_simulation);

    observe(
        &room,
        &Envelope::new(
            EventName::RoomLeaved,
            json!({ "roomName": "lobby", "leavedUser": { "id": "guest" } }),
        ),
    );
    assert!(room
        .lock()
        .expect("lock")
        .as_ref()
        .is_some_and(|view| view.status.guests.is_empty()));

    observe(
        &room,
        &Envelope::new(
            EventName::RoomLeaved,
            json!({ "roomName": "lobby", "leavedUser": { "id": "me" } }),
        ),
    );
    assert!(room.lock().expect("lock").is_none());
}

#[tokio::test]
async fn reply_waits_past_deltas_and_foreign_rejections() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = Connection::new(ConnectionId::from("alice"), tx);
    let mut inbound = conn.subscribe();

    conn.dispatch(Envelope::new(
        EventName::InvalidPayload,
        json!({ "eventName": "add-living-cells" }),
    ));
    conn.dispatch(Envelope::new(
        EventName::RoomJoined,
        json!({ "roomName": "one", "newUser": { "id": "bob" }, "roomStatus": null }),
    ));
    conn.dispatch(Envelope::new(
        EventName::RoomJoined,
        json!({ "roomName": "two", "newUser": { "id": "alice" }, "roomStatus": { "players": [], "guests": [{ "id": "alice" }] } }),
    ));

    let joined = reply::<events::JoinRoom, events::RoomJoined>(&mut inbound, |joined| {
        joined.room_name == "two" && joined.room_status.is_some()
    })
    .await
    .expect("snapshot");
    assert_eq!(joined.room_status.expect("status").guests.len(), 1);

    conn.dispatch(Envelope::new(
        EventName::InvalidPayload,
        json!({ "eventName": "join-room" }),
    ));
    let err = reply::<events::JoinRoom, events::RoomJoined>(&mut inbound, |_| true)
        .await
        .expect_err("rejected");
    assert!(err.to_string().contains("join-room"));
}

#[tokio::test]
async fn create_and_join_share_one_roster() -> Result<()> {
    let (url, _api) = spawn_server(Duration::from_millis(50)).await?;
    let alice = GameClient::connect(&url).await?;
    let bob = GameClient::connect(&url).await?;

    let created = alice.create_room("lobby").await?;
    assert_eq!(created.room_status.expect("snapshot").players.len(), 1);

    let delta = alice.bind::<events::RoomJoined>().next();
    let joined = bob.join_room("lobby").await?;
    let status = joined.room_status.expect("snapshot");
    assert_eq!(status.players.len(), 2);

    let delta = timeout(Duration::from_secs(5), delta).await??;
    assert_eq!(delta.room_status, None);
    assert_eq!(delta.new_user, joined.new_user);

    let view = alice.current_room().expect("alice in a room");
    assert_eq!(view.status.players.len(), 2);
    assert_eq!(view.dimension, Dimension::default());

    assert_eq!(alice.room_names().await?, vec!["lobby".to_string()]);
    Ok(())
}

#[tokio::test]
async fn malformed_request_aborts_the_pending_reply() -> Result<()> {
    let (url, _api) = spawn_server(Duration::from_millis(50)).await?;
    let client = GameClient::connect(&url).await?;

    let reply = client
        .bind::<events::RoomJoined>()
        .next_or_abort(&[EventName::InvalidPayload]);
    client
        .connection()
        .send(EventName::CreateRoom, json!({ "hello": "world" }))?;

    let err = timeout(Duration::from_secs(5), reply)
        .await?
        .expect_err("rejected");
    assert!(err.is_aborted_by(EventName::InvalidPayload));
    let payload: InvalidPayloadPayload = err.abort_payload().expect("payload");
    assert_eq!(payload.event_name, "create-room");
    Ok(())
}

#[tokio::test]
async fn votes_drive_buffered_generations() -> Result<()> {
    let (url, api) = spawn_server(Duration::from_millis(20)).await?;
    let alice = GameClient::connect(&url).await?;
    alice.create_room("lobby").await?;

    let initial = next_frame(&alice).await;
    assert!(initial.cells.is_empty());

    alice.add_living_cells(vec![
        Position::new(1, 0),
        Position::new(1, 1),
        Position::new(1, 2),
    ])?;
    let seeded = next_frame(&alice).await;
    assert_eq!(seeded.cells.len(), 3);
    assert_eq!(seeded.simulation_frame, None);

    alice.request_simulation(true)?;
    let first = next_frame(&alice).await;
    let second = next_frame(&alice).await;
    assert_eq!(first.simulation_frame, Some(1));
    assert_eq!(second.simulation_frame, Some(2));
    assert!(first.cells.iter().all(|cell| cell.position.y == 1));

    alice.request_simulation(false)?;
    let stopped = async {
        loop {
            let room = api.registry.room("lobby").await.expect("room");
            if !room.lock().await.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    timeout(Duration::from_secs(5), stopped).await?;
    Ok(())
}

#[tokio::test]
async fn moving_rooms_skips_deltas_from_the_old_room() -> Result<()> {
    let (url, _api) = spawn_server(Duration::from_millis(50)).await?;
    let alice = GameClient::connect(&url).await?;
    let bob = GameClient::connect(&url).await?;
    alice.create_room("two").await?;
    alice.create_room("one").await?;

    // bob's delta for "one" reaches alice while she asks for "two"
    let (bob_joined, joined) = tokio::join!(bob.join_room("one"), alice.join_room("two"));
    bob_joined?;
    let joined = joined?;

    assert_eq!(joined.room_name, "two");
    assert_eq!(joined.room_status.expect("snapshot").players.len(), 1);
    assert_eq!(
        alice.current_room().map(|view| view.room_name),
        Some("two".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn rejections_of_other_events_do_not_fail_a_join() -> Result<()> {
    let (url, _api) = spawn_server(Duration::from_millis(50)).await?;
    let client = GameClient::connect(&url).await?;

    client
        .connection()
        .send(EventName::AddLivingCells, json!({ "position": "nowhere" }))?;
    let joined = client.create_room("lobby").await?;
    assert_eq!(joined.room_name, "lobby");
    Ok(())
}

#[tokio::test]
async fn late_joiner_is_a_guest_and_cannot_vote() -> Result<()> {
    let (url, _api) = spawn_server(Duration::from_millis(50)).await?;
    let alice = GameClient::connect(&url).await?;
    let carol = GameClient::connect(&url).await?;
    alice.create_room("lobby").await?;
    let echo = alice.bind::<events::RequestSimulationUpdated>().next();
    alice.request_simulation(true)?;
    timeout(Duration::from_secs(5), echo).await??;

    let joined = carol.join_room("lobby").await?;
    assert!(matches!(joined.new_user, Some(Member::Guest(_))));
    assert!(carol.request_simulation(false).is_err());
    assert!(carol.add_living_cells(vec![Position::new(1, 1)]).is_err());
    Ok(())
}

#[tokio::test]
async fn reconnect_keeps_bindings() -> Result<()> {
    let (url, _api) = spawn_server(Duration::from_millis(50)).await?;
    let client = GameClient::connect(&url).await?;
    client.create_room("lobby").await?;
    let bound = client.connection().bound_events();

    client.reconnect().await?;
    assert!(client.current_room().is_none());
    assert_eq!(client.connection().bound_events(), bound);

    let joined = client.join_room("lobby").await?;
    assert!(joined.room_status.is_some());
    assert_eq!(client.current_room().map(|view| view.room_name), Some("lobby".to_string()));
    let after = client.connection().bound_events();
    assert!(bound.iter().all(|name| after.contains(name)));
    Ok(())
}

#[tokio::test]
async fn close_fails_pending_waits() -> Result<()> {
    let (url, _api) = spawn_server(Duration::from_millis(50)).await?;
    let client = GameClient::connect(&url).await?;
    let pending = client.bind::<events::SetupClientEnv>().next();

    client.close().await;

    let err = timeout(Duration::from_secs(5), pending)
        .await?
        .expect_err("closed");
    assert!(matches!(err, ChannelError::Disconnected));
    assert!(client.create_room("lobby").await.is_err());
    assert!(client.reconnect().await.is_err());
    Ok(())
}
