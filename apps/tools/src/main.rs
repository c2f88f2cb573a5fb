use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::GameClient;
use engine::patterns;
use shared::domain::{Member, Position};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8443")]
    server: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the rooms on the server.
    Rooms,
    /// Create a room (or join it if it exists) and print its roster.
    Create { room: String },
    /// Drop a named pattern onto a room's board.
    Seed {
        room: String,
        pattern: String,
        #[arg(long, default_value_t = 0)]
        x: i64,
        #[arg(long, default_value_t = 0)]
        y: i64,
    },
    /// List the seed patterns this tool knows.
    Patterns,
    /// Join a room and print board updates as they arrive.
    Watch {
        room: String,
        /// Vote to run the simulation after joining.
        #[arg(long)]
        vote: bool,
        /// Stop after this many updates.
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    if let Command::Patterns = cli.command {
        for name in patterns::names() {
            println!("{name}");
        }
        return Ok(());
    }

    let client = GameClient::connect(&cli.server)
        .await
        .with_context(|| format!("cannot reach {}", cli.server))?;

    match cli.command {
        Command::Rooms => {
            for name in client.room_names().await? {
                println!("{name}");
            }
        }
        Command::Create { room } => {
            let joined = client.create_room(&room).await?;
            let status = joined.room_status.unwrap_or_default();
            println!(
                "room={room} players={} guests={}",
                status.players.len(),
                status.guests.len()
            );
        }
        Command::Seed { room, pattern, x, y } => {
            let Some(pattern) = patterns::find(&pattern) else {
                bail!("unknown pattern '{pattern}', try `tools patterns`");
            };
            let joined = client.join_room(&room).await?;
            if !matches!(joined.new_user, Some(Member::Player(_))) {
                bail!("room '{room}' is running, guests cannot seed it");
            }
            // board sent on join
            client.next_generation().await?;
            client.add_living_cells(pattern.at(Position::new(x, y)))?;
            let board = client.next_generation().await?;
            println!("seeded {} in {room}: {} living cells", pattern.name, board.cells.len());
        }
        Command::Watch { room, vote, limit } => {
            client.join_room(&room).await?;
            if vote {
                client.request_simulation(true)?;
            }
            let mut seen = 0;
            while limit.map_or(true, |limit| seen < limit) {
                let update = client.next_generation().await?;
                match update.simulation_frame {
                    Some(frame) => println!("frame {frame}: {} cells", update.cells.len()),
                    None => println!("edit: {} cells", update.cells.len()),
                }
                seen += 1;
            }
        }
        Command::Patterns => {}
    }

    client.close().await;
    Ok(())
}
