use std::path::PathBuf;

use anyhow::Result;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http_body_util::Full;
use prometheus::Encoder;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use treefs::config::StoreArgs;
use treefs::http_api::HttpApiService;
use treefs::inspect::{disk_space, format_bytes, num_keys};
use treefs::metastore::{RecordField, FOLDER_MIME_TYPE};
use treefs::metrics::SharedMetrics;
use treefs::retrieve::{retrieve, RetrieveConfig};
use treefs::tree::{SearchQuery, SortSpec};
use treefs::{Flags, ReadResult, TreeFs};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
pub struct ServerConfig {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value = "8014")]
    port: u16,

    #[arg(long, default_value = "localhost")]
    metric_host: String,

    #[arg(long, default_value = "9100")]
    metric_port: u16,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect the metadata DB
    Inspect {
        #[command(subcommand)]
        command: InspectCommand,
    },

    /// Copy the content of a file to a local path
    Retrieve(RetrieveConfig),

    /// Start the HTTP API server
    Server(ServerConfig),

    #[command(flatten)]
    Fs(FsCommand),
}

/// File operations run directly against the stores.
#[derive(Debug, Subcommand)]
pub enum FsCommand {
    /// Create a root folder
    InitRoot { name: String },

    /// List the roots
    Roots,

    /// Resolve a path below a root to an id
    Alias { root: String, path: String },

    /// List the children of a folder, or print the content URL of a file
    Ls { id: String },

    /// Show a record
    Stat {
        id: String,

        #[arg(long, help = "Comma separated fields to show")]
        fields: Option<String>,
    },

    /// Upload a local file into a folder
    Put {
        parent: String,
        file: PathBuf,

        #[arg(long, help = "Name in the folder (defaults to the local file name)")]
        name: Option<String>,

        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,

        #[arg(long, help = "Overwrite an existing file with the same name")]
        force: bool,
    },

    /// Create a folder
    Mkdir { parent: String, name: String },

    /// Move a file or folder into another folder
    Mv { id: String, to: String },

    /// Copy a file or folder into another folder
    Cp { id: String, to: String },

    /// Rename a file or folder
    Rename { id: String, name: String },

    /// Remove a file, or a folder and everything below it
    Rm { id: String },

    /// Search a subtree
    Search {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        contains: Option<String>,

        #[arg(long)]
        mime_type: Option<String>,

        #[arg(long)]
        min_size: Option<u64>,

        #[arg(long)]
        max_size: Option<u64>,

        #[arg(long, help = "name, size, dateCreated or lastModified, optionally with :desc")]
        sort: Option<String>,

        #[arg(long, help = "Only the record and its direct children")]
        shallow: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum InspectCommand {
    // number of keys
    NumKeys,
    DiskSpace,
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    match cli.command {
        Command::Inspect { command } => {
            let meta_root = cli.store.resolve()?.meta.root;
            match command {
                InspectCommand::NumKeys => {
                    let num_keys = num_keys(meta_root)?;
                    println!("Number of keys: {num_keys}");
                }
                InspectCommand::DiskSpace => {
                    let disk_space = disk_space(meta_root)?;
                    println!("Disk space: {} ({disk_space} bytes)", format_bytes(disk_space));
                }
            }
        }
        Command::Retrieve(config) => retrieve(&cli.store, config)?,
        Command::Server(config) => run(&cli.store, config)?,
        Command::Fs(command) => run_command(&cli.store, command)?,
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn run_command(store: &StoreArgs, command: FsCommand) -> Result<()> {
    let fs = TreeFs::open(&store.load()?, SharedMetrics::default())?;

    match command {
        FsCommand::InitRoot { name } => print_json(&fs.create_root(&name).await?)?,
        FsCommand::Roots => print_json(&fs.roots().await?)?,
        FsCommand::Alias { root, path } => println!("{}", fs.alias(&path, &root).await?),
        FsCommand::Ls { id } => match fs.read(&id).await? {
            ReadResult::Children(children) => {
                for child in children {
                    println!("{child}");
                }
            }
            ReadResult::Url(url) => println!("{url}"),
        },
        FsCommand::Stat { id, fields } => {
            let fields = fields
                .map(|list| {
                    list.split(',')
                        .map(str::parse::<RecordField>)
                        .collect::<treefs::Result<Vec<_>>>()
                })
                .transpose()?;
            print_json(&fs.inspect(&id, fields.as_deref()).await?)?
        }
        FsCommand::Put {
            parent,
            file,
            name,
            mime_type,
            force,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow::anyhow!("cannot derive a name from {}", file.display()))?,
            };
            let content = Bytes::from(tokio::fs::read(&file).await?);
            let flags = Flags {
                force,
                ..Default::default()
            };
            print_json(&fs.create(&parent, &mime_type, &name, content, flags).await?)?
        }
        FsCommand::Mkdir { parent, name } => {
            let record = fs
                .create(&parent, FOLDER_MIME_TYPE, &name, Bytes::new(), Flags::default())
                .await?;
            print_json(&record)?
        }
        FsCommand::Mv { id, to } => print_json(&fs.move_to(&id, &to).await?)?,
        FsCommand::Cp { id, to } => print_json(&fs.copy(&id, &to).await?)?,
        FsCommand::Rename { id, name } => print_json(&fs.rename(&id, &name).await?)?,
        FsCommand::Rm { id } => {
            for removed in fs.destroy(&id).await? {
                println!("{removed}");
            }
        }
        FsCommand::Search {
            id,
            name,
            contains,
            mime_type,
            min_size,
            max_size,
            sort,
            shallow,
        } => {
            let query = SearchQuery {
                name,
                name_contains: contains,
                mime_type,
                min_size,
                max_size,
            };
            let sort = sort.as_deref().map(str::parse::<SortSpec>).transpose()?;
            let flags = Flags {
                shallow,
                ..Default::default()
            };
            print_json(&fs.search(&id, &query, sort, flags).await?)?
        }
    }

    fs.metadata().store().close()?;
    Ok(())
}

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;

#[tokio::main]
async fn run(store: &StoreArgs, args: ServerConfig) -> anyhow::Result<()> {
    let config = store.load()?;
    let metrics = SharedMetrics::prometheus();
    let fs = TreeFs::open(&config, metrics)?;
    let service = HttpApiService::new(fs.clone(), config.limits.max_upload_size);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    let local_addr = listener.local_addr()?;

    // metrics server
    let metrics_listener =
        tokio::net::TcpListener::bind((args.metric_host.as_str(), args.metric_port)).await?;
    let metrics_addr = metrics_listener.local_addr()?;

    info!("metrics server is running at http://{metrics_addr}");

    let metrics_service = hyper::service::service_fn(
        move |req: hyper::Request<hyper::body::Incoming>| async move {
            let response = match (req.method(), req.uri().path()) {
                (&hyper::Method::GET, "/metrics") => {
                    let mut buffer = Vec::new();
                    let encoder = prometheus::TextEncoder::new();
                    let metric_families = prometheus::gather();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = hyper::Response::new(Full::new(Bytes::from(buffer)));
                            response.headers_mut().insert(
                                hyper::header::CONTENT_TYPE,
                                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                            );
                            response
                        }
                        Err(err) => {
                            tracing::error!("failed to encode metrics: {err}");
                            let mut response = hyper::Response::new(Full::new(Bytes::new()));
                            *response.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    }
                }
                _ => {
                    let mut response = hyper::Response::new(Full::new(Bytes::from("Not Found")));
                    *response.status_mut() = hyper::StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        },
    );

    let http_server = ConnBuilder::new(TokioExecutor::new());
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    info!("server is running at http://{local_addr}");

    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let service = service.clone();
                        let api_handler = hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let service = service.clone();
                            async move { service.handle_request(req).await }
                        });
                        let conn = http_server.serve_connection(TokioIo::new(socket), api_handler);
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        tracing::error!("error accepting connection: {err}");
                    }
                }
            }
            res = metrics_listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server.serve_connection(TokioIo::new(socket), metrics_service);
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        tracing::error!("error accepting metrics connection: {err}");
                    }
                }
            }
            _ = ctrl_c.as_mut() => {
                break;
            }
        };
    }

    tokio::select! {
        () = graceful.shutdown() => {
             tracing::debug!("Gracefully shutdown!");
        },
        () = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
             tracing::debug!("Waited 10 seconds for graceful shutdown, aborting...");
        }
    }

    fs.metadata().store().close()?;
    info!("server is stopped");
    Ok(())
}
