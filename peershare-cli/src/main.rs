//! Peershare client CLI.
//!
//! Every command loads the session, resolves a reachable tracker, issues
//! one RPC and prints the outcome. `login` additionally spawns the hidden
//! `peer-daemon` subcommand, which keeps a chunk-serving peer server alive
//! in the background.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use clap::{Parser, Subcommand};
use peershare_common::{FileEntry, GroupCreated, TrackerRequest, UploadAck};
use peershare_core::{
    chunk_file, ChunkStore, ClientConfig, ClientError, DownloadOptions, Downloader, PeerServer,
    Session, TrackerPool,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Parser)]
#[command(name = "peershare")]
#[command(about = "Peershare client - share files with your groups, peer to peer")]
#[command(version)]
struct Cli {
    /// Tracker config file: one host:port per line
    #[arg(long, default_value = "tracker_info.txt")]
    trackers: PathBuf,

    /// Probe peer bitfields and download rarest chunks first
    #[arg(long)]
    rarest_first: bool,

    /// Milliseconds to pause between chunk fetches
    #[arg(long)]
    chunk_delay_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new user
    CreateUser { user: String, pass: String },
    /// Log in and start the background peer server
    Login { user: String, pass: String },
    /// Clear the local session
    Logout,
    /// Show the current session
    Status,
    /// Create a group owned by the logged-in user
    CreateGroup { group_id: String },
    /// List every group in the network
    ListGroups,
    /// Ask to join a group
    JoinGroup { group_id: String },
    /// List pending join requests (owner only)
    ListRequests { group_id: String },
    /// Accept a pending join request (owner only)
    AcceptRequest { group_id: String, user: String },
    /// Leave a group
    LeaveGroup { group_id: String },
    /// Chunk a file and register it with the group
    UploadFile { path: PathBuf, group_id: String },
    /// List the files shared in a group
    ListFiles { group_id: String },
    /// Download a file from its seeders
    DownloadFile {
        group_id: String,
        file_name: String,
        dest: Option<PathBuf>,
    },
    /// Withdraw from seeding a file
    StopSharing { group_id: String, file_name: String },
    /// List locally stored downloads
    ShowDownloads,
    /// Internal: run the peer server (spawned by login)
    #[command(hide = true)]
    PeerDaemon,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = tracing_subscriber::filter::LevelFilter::from(cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(log_level),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let mut config = ClientConfig::default();
    config.load_trackers(&cli.trackers);
    config.rarest_first = cli.rarest_first;
    config.chunk_delay = cli.chunk_delay_ms.map(Duration::from_millis);

    let mut session = Session::load()?;
    let mut pool = TrackerPool::new(config.trackers.clone());
    pool.refresh_active().await;

    match cli.command {
        Command::CreateUser { user, pass } => {
            let resp = pool
                .send_expect_ok(&TrackerRequest::new("create_user", vec![user.clone(), pass]))
                .await?;
            println!("✓ {} ({user})", resp.message());
        }

        Command::Login { user, pass } => {
            // The peer daemon reports the real address once it has bound.
            let req = TrackerRequest::new("login", vec![user.clone(), pass, String::new()]);
            pool.send_expect_ok(&req).await?;

            session.user_id = user;
            session.listen_addr = String::new();
            session.save()?;

            let exe = std::env::current_exe()?;
            let child = std::process::Command::new(exe)
                .arg("--trackers")
                .arg(&cli.trackers)
                .arg("peer-daemon")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;

            println!("✓ logged in");
            println!("peer server started in background (PID: {})", child.id());
        }

        Command::Logout => {
            Session::clear()?;
            println!("✓ logged out");
        }

        Command::Status => {
            if session.is_logged_in() {
                println!("logged in as {}", session.user_id);
                if session.listen_addr.is_empty() {
                    println!("peer server: starting...");
                } else {
                    println!("peer server: {}", session.listen_addr);
                }
            } else {
                println!("not logged in");
            }
        }

        Command::CreateGroup { group_id } => {
            let user = require_login(&session)?;
            let req = TrackerRequest::new("create_group", vec![group_id, user]);
            let created: GroupCreated = pool.send_expect_ok(&req).await?.parse_data()?;
            println!("✓ group '{}' created (owner: {})", created.group_id, created.owner);
        }

        Command::ListGroups => {
            let req = TrackerRequest::new("list_groups", Vec::new());
            let groups: Vec<String> = pool.send_expect_ok(&req).await?.parse_data()?;
            if groups.is_empty() {
                println!("no groups found");
            } else {
                for (i, group) in groups.iter().enumerate() {
                    println!("{}. {group}", i + 1);
                }
            }
        }

        Command::JoinGroup { group_id } => {
            let user = require_login(&session)?;
            let req = TrackerRequest::new("join_group", vec![group_id.clone(), user]);
            let resp = pool.send_expect_ok(&req).await?;
            println!("✓ {} (group '{group_id}')", resp.message());
        }

        Command::ListRequests { group_id } => {
            let user = require_login(&session)?;
            let req = TrackerRequest::new("list_requests", vec![group_id.clone(), user]);
            let pending: Vec<String> = pool.send_expect_ok(&req).await?.parse_data()?;
            if pending.is_empty() {
                println!("no pending requests");
            } else {
                println!("pending join requests for '{group_id}':");
                for (i, user) in pending.iter().enumerate() {
                    println!("{}. {user}", i + 1);
                }
            }
        }

        Command::AcceptRequest { group_id, user } => {
            let owner = require_login(&session)?;
            let req =
                TrackerRequest::new("accept_requests", vec![group_id.clone(), owner, user.clone()]);
            pool.send_expect_ok(&req).await?;
            println!("✓ accepted '{user}' into group '{group_id}'");
        }

        Command::LeaveGroup { group_id } => {
            let user = require_login(&session)?;
            let req = TrackerRequest::new("leave_group", vec![group_id.clone(), user]);
            pool.send_expect_ok(&req).await?;
            println!("✓ left group '{group_id}'");
        }

        Command::UploadFile { path, group_id } => {
            let user = require_login(&session)?;

            println!("chunking {}...", path.display());
            let manifest = chunk_file(&path)?;
            let store = ChunkStore::new(&config.chunks_root);
            store.import_file(&path, &manifest)?;

            let chunks_json = serde_json::to_string(&manifest.chunks)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let req = TrackerRequest::new(
                "upload_file",
                vec![
                    manifest.file_name.clone(),
                    group_id,
                    user,
                    manifest.file_size.to_string(),
                    manifest.file_hash.to_hex(),
                    chunks_json,
                ],
            );
            let ack: UploadAck = pool.send_expect_ok(&req).await?.parse_data()?;

            println!("✓ file uploaded");
            println!("  file:   {}", ack.file_name);
            println!("  group:  {}", ack.group_id);
            println!("  size:   {} bytes", ack.file_size);
            println!("  hash:   {}", ack.file_hash);
            println!("  chunks: {}", ack.total_chunks);
        }

        Command::ListFiles { group_id } => {
            let user = require_login(&session)?;
            let req = TrackerRequest::new("list_files", vec![group_id.clone(), user]);
            let files: Vec<FileEntry> = pool.send_expect_ok(&req).await?.parse_data()?;
            if files.is_empty() {
                println!("no files in group '{group_id}'");
            } else {
                println!("files in group '{group_id}':");
                for (i, file) in files.iter().enumerate() {
                    println!(
                        "{}. {} ({} bytes, uploader: {})",
                        i + 1,
                        file.file_name,
                        file.file_size,
                        file.uploader
                    );
                }
            }
        }

        Command::DownloadFile {
            group_id,
            file_name,
            dest,
        } => {
            let user = require_login(&session)?;
            let dest = dest.unwrap_or_else(|| PathBuf::from(&file_name));

            let store = ChunkStore::new(&config.chunks_root);
            let options = DownloadOptions {
                rarest_first: config.rarest_first,
                chunk_delay: config.chunk_delay,
            };
            let report = Downloader::new(&pool, &store, options)
                .download(&group_id, &file_name, &dest, &user)
                .await?;

            println!("✓ download complete: {}", dest.display());
            println!(
                "  {} chunks fetched, {} already on disk",
                report.fetched, report.skipped
            );
        }

        Command::StopSharing {
            group_id,
            file_name,
        } => {
            let user = require_login(&session)?;
            let req = TrackerRequest::new(
                "stop_sharing",
                vec![group_id.clone(), file_name.clone(), user],
            );
            let resp = pool.send_expect_ok(&req).await?;
            println!("✓ {} ('{file_name}' in '{group_id}')", resp.message());
            println!("note: local chunks are preserved under {}", config.chunks_root.display());
        }

        Command::ShowDownloads => {
            let store = ChunkStore::new(&config.chunks_root);
            let manifests = store.list_manifests();
            if manifests.is_empty() {
                println!("no downloaded files found");
            } else {
                println!("downloaded files:");
                for (i, m) in manifests.iter().enumerate() {
                    println!(
                        "{}. {} ({} bytes, {} chunks, hash {})",
                        i + 1,
                        m.file_name,
                        m.file_size,
                        m.total_chunks,
                        m.file_hash
                    );
                }
            }
        }

        Command::PeerDaemon => {
            let user = require_login(&session)?;

            let store = ChunkStore::new(&config.chunks_root);
            let server = PeerServer::bind(store, "127.0.0.1:0").await?;
            let addr = server.local_addr().to_string();

            let req = TrackerRequest::new("update_address", vec![user, addr.clone()]);
            if let Err(e) = pool.send_expect_ok(&req).await {
                tracing::warn!("failed to report peer address: {e}");
            }

            session.listen_addr = addr;
            session.save()?;

            server.run().await;
        }
    }

    Ok(())
}

fn require_login(session: &Session) -> Result<String, ClientError> {
    if session.is_logged_in() {
        Ok(session.user_id.clone())
    } else {
        Err(ClientError::NotLoggedIn)
    }
}
