use std::path::{Path, PathBuf};
use std::time::Duration;

use agora::api::{LikeTarget, Upload};
use agora::config::{ClientConfig, ConfigError};
use agora::request::{Expect, RequestOptions};
use agora::{AgoraClient, ClientError, RealtimeError, RequestError, jwt};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Upper bound on waiting for the broker to acknowledge `DISCONNECT`.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error("failed to read {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("timed out waiting for realtime connection")]
    ConnectTimeout,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "agora-cli", about = "Agora API and realtime chat CLI")]
struct Cli {
    #[arg(long, env = "AGORA_API_BASE")]
    api_base: Option<String>,

    /// Session file; defaults to `$HOME/.agora/session.json`.
    #[arg(long, env = "AGORA_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[arg(long, env = "AGORA_SOCKJS")]
    sockjs: Option<bool>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    Login(LoginArgs),
    Logout,
    Whoami,
    Api(ApiCommand),
    Chat(ChatCommand),
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long, env = "AGORA_EMAIL")]
    email: String,

    #[arg(long, env = "AGORA_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct ApiCommand {
    #[command(subcommand)]
    command: ApiSubcommand,
}

#[derive(Subcommand, Debug)]
enum ApiSubcommand {
    #[command(subcommand)]
    Posts(PostsSubcommand),
    Conversations,
    Messages {
        conversation_id: String,
    },
    #[command(subcommand)]
    Listings(ListingsSubcommand),
    #[command(subcommand)]
    Users(UsersSubcommand),
}

#[derive(Subcommand, Debug)]
enum PostsSubcommand {
    List,
    Create {
        #[arg(long)]
        content: String,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    Comments {
        post_id: String,
    },
    Like {
        post_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ListingsSubcommand {
    List {
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Get {
        listing_id: String,
    },
    Delete {
        listing_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum UsersSubcommand {
    List,
    Me,
}

#[derive(Args, Debug)]
struct ChatCommand {
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: ChatSubcommand,
}

#[derive(Subcommand, Debug)]
enum ChatSubcommand {
    /// Print messages of a conversation until interrupted.
    Listen { conversation_id: String },
    Send { conversation_id: String, content: String },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = build_client(&cli)?;

    match cli.command {
        Command::Ping => run_ping(&client).await,
        Command::Login(args) => run_login(&client, args).await,
        Command::Logout => {
            client.logout()?;
            println!("logged out");
            Ok(())
        }
        Command::Whoami => run_whoami(&client),
        Command::Api(api) => run_api(&client, api).await,
        Command::Chat(chat) => run_chat(&client, chat).await,
    }
}

fn build_client(cli: &Cli) -> Result<AgoraClient, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base) = &cli.api_base {
        config.api_base = base.trim_end_matches('/').to_owned();
    }
    if let Some(sockjs) = cli.sockjs {
        config.sockjs = sockjs;
    }
    config.session_file = cli
        .session_file
        .clone()
        .or(config.session_file)
        .or_else(default_session_file);
    Ok(AgoraClient::from_config(config)?)
}

fn default_session_file() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".agora").join("session.json"))
}

async fn run_ping(client: &AgoraClient) -> Result<(), CliError> {
    let options = RequestOptions::get().anonymous().max_retries(0).expect(Expect::Raw);
    match client.api().client().request("/", options).await {
        Ok(_) => println!("ok"),
        Err(err) => match err.status() {
            Some(status) => println!("ok (HTTP {status})"),
            None => return Err(err.into()),
        },
    }
    Ok(())
}

async fn run_login(client: &AgoraClient, args: LoginArgs) -> Result<(), CliError> {
    let response = client.api().login(&args.email, &args.password).await?;
    print_json(&json!({
        "username": response.username,
        "role": jwt::role(&response.token),
    }))
}

fn run_whoami(client: &AgoraClient) -> Result<(), CliError> {
    let session = client.session().snapshot();
    let role = session.token.as_deref().and_then(jwt::role);
    let avatar = session.avatar_url.as_deref().map_or_else(
        || client.api().default_avatar_url(),
        |path| client.api().media_url(path),
    );
    print_json(&json!({
        "authenticated": session.is_authenticated(),
        "username": session.username,
        "userId": session.user_id,
        "role": role,
        "avatarUrl": avatar,
    }))
}

async fn run_api(client: &AgoraClient, api: ApiCommand) -> Result<(), CliError> {
    let api_client = client.api();
    let value = match api.command {
        ApiSubcommand::Posts(PostsSubcommand::List) => api_client.list_posts().await?,
        ApiSubcommand::Posts(PostsSubcommand::Create { content, image }) => {
            let image = match image {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };
            api_client.create_post(&content, image).await?
        }
        ApiSubcommand::Posts(PostsSubcommand::Comments { post_id }) => api_client.list_comments(&post_id).await?,
        ApiSubcommand::Posts(PostsSubcommand::Like { post_id }) => {
            api_client.toggle_like(LikeTarget::Post(&post_id)).await?
        }
        ApiSubcommand::Conversations => api_client.list_conversations().await?,
        ApiSubcommand::Messages { conversation_id } => api_client.conversation_messages(&conversation_id).await?,
        ApiSubcommand::Listings(ListingsSubcommand::List { q, category }) => {
            let mut params = Vec::new();
            if let Some(category) = category.as_deref() {
                params.push(("category", category));
            }
            match q.as_deref() {
                Some(q) => api_client.search_listings(q, &params).await?,
                None => api_client.list_listings(&params).await?,
            }
        }
        ApiSubcommand::Listings(ListingsSubcommand::Get { listing_id }) => api_client.listing(&listing_id).await?,
        ApiSubcommand::Listings(ListingsSubcommand::Delete { listing_id }) => {
            api_client.delete_listing(&listing_id).await?.into_json().unwrap_or(Value::Null)
        }
        ApiSubcommand::Users(UsersSubcommand::List) => api_client.list_users().await?,
        ApiSubcommand::Users(UsersSubcommand::Me) => api_client.profile().await?,
    };
    print_json(&value)
}

async fn run_chat(client: &AgoraClient, chat: ChatCommand) -> Result<(), CliError> {
    wait_connected(client, Duration::from_secs(chat.connect_timeout_secs)).await?;
    let realtime = client.realtime();

    let result = match chat.command {
        ChatSubcommand::Listen { conversation_id } => {
            let topic = realtime.conversation_topic(&conversation_id);
            let mut subscription = realtime.subscribe(&topic).ok_or(RealtimeError::NotConnected)?;
            eprintln!("listening on {topic}; ctrl-c to stop");
            loop {
                tokio::select! {
                    message = subscription.recv() => match message {
                        Some(value) => print_json(&value)?,
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            Ok(())
        }
        ChatSubcommand::Send { conversation_id, content } => {
            realtime.send_message(&conversation_id, &content)?;
            println!("sent");
            Ok(())
        }
    };

    realtime.close(CLOSE_GRACE).await;
    result
}

async fn wait_connected(client: &AgoraClient, timeout: Duration) -> Result<(), CliError> {
    let (ready_tx, ready_rx) = oneshot::channel();
    client.connect_realtime(move || {
        let _ = ready_tx.send(());
    })?;
    match tokio::time::timeout(timeout, ready_rx).await {
        Ok(Ok(())) => Ok(()),
        _ => {
            client.realtime().disconnect();
            Err(CliError::ConnectTimeout)
        }
    }
}

async fn read_upload(path: &Path) -> Result<Upload, CliError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| CliError::ReadFile { path: path.to_owned(), source })?;
    let filename = path
        .file_name()
        .map_or_else(|| "upload".to_owned(), |name| name.to_string_lossy().into_owned());
    let upload = Upload::new(filename, bytes);
    Ok(match mime_for(path) {
        Some(mime) => upload.with_mime(mime),
        None => upload,
    })
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
