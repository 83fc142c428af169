use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use scenesync_client::{ClientConfig, ClientMirror, EventDispatcher, RoomClient};
use scenesync_core::ticket::{decode_ticket, encode_ticket};
use scenesync_core::{ErrorKind, RoomId, ServerMessage, UserId};
use scenesync_server::{MemoryStore, RoomServer, ServerConfig, Store, default_data_path, transport};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Real-time shared scene rooms over iroh
#[derive(Parser, Debug)]
#[command(name = "scenesync")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a room server and print its ticket
    Serve {
        /// Room to make available (repeatable)
        #[arg(long = "room", value_name = "ROOM")]
        rooms: Vec<String>,

        /// Refuse connections beyond this many
        #[arg(long, default_value_t = 256)]
        max_connections: usize,

        /// Refuse joins into a room that already has this many members
        #[arg(long)]
        max_room_members: Option<usize>,

        /// Object update debounce window in milliseconds
        #[arg(long, default_value_t = 16)]
        debounce_ms: u64,

        /// Snapshot file for rooms and objects
        #[arg(long, value_name = "PATH")]
        data: Option<PathBuf>,

        /// Keep everything in memory only
        #[arg(long, conflicts_with = "data")]
        ephemeral: bool,
    },
    /// Join a room without a UI and log what happens in it
    Join {
        /// Server ticket printed by `serve`
        #[arg(long, value_name = "TICKET")]
        ticket: String,

        #[arg(long)]
        room: String,

        /// Stable user id (random if omitted)
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scenesync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Serve {
            rooms,
            max_connections,
            max_room_members,
            debounce_ms,
            data,
            ephemeral,
        } => {
            let data_path = if ephemeral {
                None
            } else {
                Some(data.unwrap_or_else(default_data_path))
            };
            let config = ServerConfig {
                max_connections,
                max_room_members,
                object_debounce: Duration::from_millis(debounce_ms),
                data_path,
                ..Default::default()
            };
            serve(config, rooms).await
        }
        Command::Join {
            ticket,
            room,
            user,
            email,
        } => join(&ticket, RoomId::new(room), user, email).await,
    }
}

async fn serve(config: ServerConfig, rooms: Vec<String>) -> Result<()> {
    let store = match &config.data_path {
        Some(path) if path.exists() => {
            let store = MemoryStore::load(path)
                .await
                .with_context(|| format!("loading snapshot {}", path.display()))?;
            info!(path = %path.display(), objects = store.object_count().await, "loaded snapshot");
            Arc::new(store)
        }
        _ => Arc::new(MemoryStore::new()),
    };
    for room in rooms {
        store.create_room(&RoomId::new(room)).await?;
    }

    let data_path = config.data_path.clone();
    let outbox_capacity = config.outbox_capacity;
    let handle = RoomServer::spawn(config, store.clone());
    let router = transport::serve(handle.clone(), outbox_capacity).await?;

    let ticket = encode_ticket(&router.endpoint().addr())?;
    println!("{ticket}");
    info!("serving, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    router.shutdown().await?;
    handle.shutdown().await;

    if let Some(path) = data_path {
        store
            .save_to(&path)
            .await
            .with_context(|| format!("saving snapshot {}", path.display()))?;
        info!(path = %path.display(), "snapshot saved");
    }
    Ok(())
}

async fn join(
    ticket: &str,
    room_id: RoomId,
    user: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let addr = decode_ticket(ticket)?;
    let config = ClientConfig::default();
    let user_id = UserId::new(user.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()));

    let mut client = RoomClient::spawn(addr, &config);
    client.join(room_id.clone());
    client.set_identity(user_id.clone(), email);

    let mut mirror = ClientMirror::new(&config, user_id);
    let mut events = EventDispatcher::new();
    events
        .on_room_state(|e| {
            info!(
                room = %e.room_id,
                objects = e.objects.len(),
                sessions = e.sessions.len(),
                "joined room"
            )
        })
        .on_user_joined(|e| info!(user = %e.user_id, name = %e.display_name, "user joined"))
        .on_user_left(|e| info!(user = %e.user_id, name = %e.display_name, "user left"))
        .on_object_created(|o| info!(id = %o.id, kind = %o.kind, by = %o.created_by, "object created"))
        .on_object_updated(|o| info!(id = %o.id, position = ?o.transform.position, "object updated"))
        .on_object_deleted(|id| info!(%id, "object deleted"))
        .on_error(|e| warn!(kind = ?e.kind, message = %e.message, "server error"));

    let outcome = loop {
        tokio::select! {
            msg = client.recv() => {
                let Some(msg) = msg else {
                    break Ok(());
                };
                let rejected = match &msg {
                    ServerMessage::Error { kind, message } => {
                        (*kind == ErrorKind::Validation && mirror.room_id().is_none())
                            .then(|| message.clone())
                    }
                    _ => None,
                };
                mirror.apply_message(msg.clone());
                events.dispatch(msg);
                if let Some(reason) = rejected {
                    break Err(reason);
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    client.close().await;
    if let Err(reason) = outcome {
        bail!("could not join {room_id}: {reason}");
    }
    info!(objects = mirror.len(), "left room");
    Ok(())
}
