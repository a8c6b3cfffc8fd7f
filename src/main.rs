//! CLI for ChanHub
//!
//! Subcommands:
//! - `server`: run the WebSocket server
//! - `client`: run a simple client (useful for smoke tests)
//! - `create-user`, `user`, `create-channel`, `add-member`, `channels`,
//!   `history`: manage the store

use std::sync::Arc;
use std::time::Duration;

use chanhub::broker::Hub;
use chanhub::config::{Settings, load_config};
use chanhub::persistence::{ChannelKind, SledStore};
use chanhub::transport::{ServerContext, start_websocket_server};
use chanhub::utils::error::{ServerError, StoreError};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Direct,
    Group,
}

impl From<KindArg> for ChannelKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Direct => ChannelKind::Direct,
            KindArg::Group => ChannelKind::Group,
        }
    }
}

#[derive(Parser)]
#[command(name = "chanhub")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Run the example client (connects, subscribes, sends one message)
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// User id to connect as
        #[arg(long)]
        user: i64,
        /// Channel to subscribe and send to
        #[arg(long)]
        topic: i64,
        #[arg(long, default_value = "Hello from chanhub")]
        text: String,
    },
    /// Register a user and print its id
    CreateUser {
        #[arg(long)]
        username: String,
    },
    /// Look up a user by name
    User {
        #[arg(long)]
        username: String,
    },
    /// Create a direct or group channel between registered users
    CreateChannel {
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Required for group channels
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long = "member", required = true)]
        members: Vec<i64>,
    },
    /// Add a user to an existing channel
    AddMember {
        #[arg(long)]
        topic: i64,
        #[arg(long)]
        user: i64,
    },
    /// List the channels a user belongs to
    Channels {
        #[arg(long)]
        user: i64,
    },
    /// Print a channel's stored messages
    History {
        #[arg(long)]
        topic: i64,
    },
}

#[tokio::main]
async fn main() {
    chanhub::utils::logging::init("info");

    let cmd = Command::parse();

    let result: Result<(), Box<dyn std::error::Error>> = match cmd {
        Command::Server => run_server().await.map_err(Into::into),
        Command::Client {
            url,
            user,
            topic,
            text,
        } => run_client(&url, user, topic, &text).await,
        admin => run_admin(admin),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

fn open_store(settings: &Settings) -> Result<SledStore, StoreError> {
    SledStore::open(
        &settings.storage.path,
        settings.storage.message_ttl_secs,
        settings.storage.max_messages_per_topic,
    )
}

async fn run_server() -> Result<(), ServerError> {
    let settings = load_config()?;
    let store = open_store(&settings)?;
    let (hub, _hub_task) = Hub::spawn(settings.broker.event_queue_capacity);
    let ctx = ServerContext::new(hub, Arc::new(store), &settings);

    tokio::select! {
        res = start_websocket_server(settings.bind_addr(), ctx) => {
            res?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

fn run_admin(cmd: Command) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config()?;
    let store = open_store(&settings)?;

    match cmd {
        Command::CreateUser { username } => {
            let user = store.create_user(&username)?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::User { username } => match store.user_by_name(&username)? {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => return Err(format!("user `{username}` does not exist").into()),
        },
        Command::CreateChannel {
            kind,
            name,
            members,
        } => {
            let channel = store.create_channel(&name, kind.into(), &members)?;
            println!("{}", serde_json::to_string_pretty(&channel)?);
        }
        Command::AddMember { topic, user } => {
            store.add_members(topic, &[user])?;
            println!("User {user} added to channel {topic}");
        }
        Command::Channels { user } => {
            let channels = store.channels_for(user)?;
            println!("{}", serde_json::to_string_pretty(&channels)?);
        }
        Command::History { topic } => {
            let messages = store.load_messages(topic)?;
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
        Command::Server | Command::Client { .. } => {}
    }
    Ok(())
}

async fn run_client(
    url: &str,
    user: i64,
    topic: i64,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let url = format!("{}/?user_id={user}", url.trim_end_matches('/'));
    let (mut ws_stream, _response) = connect_async(url.as_str()).await?;

    let subscribe = json!({ "kind": "subscribe", "topic": topic });
    ws_stream
        .send(WsMessage::Text(subscribe.to_string().into()))
        .await?;

    let message = json!({ "kind": "message", "topic": topic, "text": text });
    ws_stream
        .send(WsMessage::Text(message.to_string().into()))
        .await?;

    match tokio::time::timeout(Duration::from_secs(5), ws_stream.next()).await {
        Ok(Some(Ok(WsMessage::Text(incoming)))) => println!("Incoming: {incoming}"),
        Ok(Some(Ok(other))) => println!("Incoming non-text frame: {other:?}"),
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(None) => println!("Server closed the connection"),
        Err(_) => println!("No message received within 5s (are you a member of channel {topic}?)"),
    }

    ws_stream.close(None).await?;
    Ok(())
}
