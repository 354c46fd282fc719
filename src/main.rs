use clap::{Parser, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use bench_dispatch::api::{
    AddJobsRequest, AddJobsResponse, PrioritizeRequest, PrioritizeResponse, QueueResponse,
    RemoveGroupResponse, DEFAULT_PAGE_SIZE,
};
use bench_dispatch::config::{DispatchConfig, ServerConfig, DEFAULT_MAX_SEND_ATTEMPTS};
use bench_dispatch::dispatch::{GroupSummary, WorkerSummary};
use bench_dispatch::node::Node;
use bench_dispatch::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "bench-dispatch")]
#[command(version)]
#[command(about = "Dispatches benchmarking jobs to remote benchmarker workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the dispatch server
    Server(ServerArgs),

    /// Job management commands
    Jobs {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Queue inspection commands
    Queue {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Job group commands
    Groups {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Worker inspection commands
    Workers {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkerCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to serve the REST API and worker websocket on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Transport calls made for one job before it goes back to the queue
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_SEND_ATTEMPTS,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    max_send_attempts: usize,

    /// Deadline for delivering one job to a worker, in milliseconds
    #[arg(long, default_value = "5000")]
    send_timeout_ms: u64,

    /// Reclaim jobs from workers silent for this many seconds (disabled if unset)
    #[arg(long)]
    in_flight_timeout_secs: Option<u64>,

    /// How often the in-flight watchdog runs, in seconds
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    watchdog_interval_secs: u64,

    /// Outbound frames buffered per worker session
    #[arg(long, default_value = "16")]
    worker_channel_capacity: usize,

    /// Append results to this file as JSON lines instead of only logging them
    #[arg(long)]
    results_file: Option<PathBuf>,
}

// =============================================================================
// Client Arguments (shared by all client commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server base URL
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Client Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Queue commits of a repository for benchmarking
    Add {
        /// Repository the commits belong to; also the job group title
        repository: String,

        /// Commit hashes to benchmark
        #[arg(required = true)]
        commit_hashes: Vec<String>,
    },
    /// Move a queued job ahead of every group
    Prioritize {
        /// Job group title (the repository)
        group_title: String,

        /// The job id (commit hash)
        job_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum QueueCommands {
    /// Show queued jobs in service order
    Show {
        /// Page number, starting at 0
        #[arg(long, default_value = "0")]
        page: usize,

        /// Jobs per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        size: usize,
    },
}

#[derive(clap::Subcommand, Debug)]
enum GroupCommands {
    /// List job groups with their time sheets
    List,
    /// Drop a group and all of its queued jobs
    Remove {
        /// Job group title
        title: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// List registered workers
    List,
}

// =============================================================================
// HTTP Client
// =============================================================================

struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    fn new(args: &ClientArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base: args.addr.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Box<dyn std::error::Error>> {
        let response = self.http.get(self.url(path)).query(query).send().await?;
        Self::decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, Box<dyn std::error::Error>> {
        let response = self.http.delete(self.url(path)).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("request failed");
        Err(format!("{} ({})", message, status).into())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut dispatch = DispatchConfig::default()
        .with_max_send_attempts(args.max_send_attempts)
        .with_send_timeout(Duration::from_millis(args.send_timeout_ms))
        .with_watchdog_interval(Duration::from_secs(args.watchdog_interval_secs));
    if let Some(secs) = args.in_flight_timeout_secs {
        dispatch = dispatch.with_in_flight_timeout(Duration::from_secs(secs));
    }

    let mut config = ServerConfig::new(args.listen).with_dispatch(dispatch);
    config.worker_channel_capacity = args.worker_channel_capacity;
    if let Some(path) = args.results_file {
        config = config.with_results_file(path);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        max_send_attempts = config.dispatch.max_send_attempts,
        results_file = ?config.results_file,
        "Starting bench-dispatch server"
    );

    let shutdown = install_shutdown_handler()?;
    let node = Node::new(config)?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_jobs_add(
    client: &ApiClient,
    repository: String,
    commit_hashes: Vec<String>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = AddJobsRequest {
        repository: repository.clone(),
        commit_hashes,
    };
    let response: AddJobsResponse = client.post("/api/jobs", &request).await?;

    match output_format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            println!("Queued {} job(s) for {}", response.added, repository);
        }
    }
    Ok(())
}

async fn handle_jobs_prioritize(
    client: &ApiClient,
    group_title: String,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = PrioritizeRequest {
        group_title,
        job_id: job_id.clone(),
    };
    let response: PrioritizeResponse = client.post("/api/prioritize", &request).await?;

    match output_format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if response.prioritized {
                println!("Job {} was prioritized", job_id);
            } else {
                println!("Job {} is not queued", job_id);
            }
        }
    }
    Ok(())
}

async fn handle_queue_show(
    client: &ApiClient,
    page: usize,
    size: usize,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let query = [("page", page.to_string()), ("size", size.to_string())];
    let response: QueueResponse = client.get("/api/queue", &query).await?;

    match output_format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            let lanes = [
                ("Prioritized", &response.prioritized),
                ("Queued", &response.jobs),
            ];
            for (title, lane) in lanes {
                println!("{} ({} total)", title, lane.total_elements);
                if lane.content.is_empty() {
                    println!("  none");
                } else {
                    println!("{:<42} {:<42} QUEUED AT", "GROUP", "JOB ID");
                    println!("{}", "-".repeat(110));
                    for job in &lane.content {
                        println!(
                            "{:<42} {:<42} {}",
                            job.group_title,
                            job.job_id,
                            job.queued_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                println!(
                    "Page {} of {}",
                    lane.page + 1,
                    lane.total_pages.max(1)
                );
                println!();
            }
        }
    }
    Ok(())
}

async fn handle_groups_list(
    client: &ApiClient,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let groups: Vec<GroupSummary> = client.get("/api/groups", &[]).await?;

    match output_format {
        OutputFormat::Json => print_json(&groups)?,
        OutputFormat::Table => {
            if groups.is_empty() {
                println!("No job groups.");
            } else {
                println!("{:<50} {:<8} TIME SHEET (s)", "GROUP", "QUEUED");
                println!("{}", "-".repeat(75));
                for group in &groups {
                    println!(
                        "{:<50} {:<8} {}",
                        group.title, group.queued, group.benchmarking_time
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_groups_remove(
    client: &ApiClient,
    title: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = format!("/api/groups/{}", urlencode(&title));
    let response: RemoveGroupResponse = client.delete(&path).await?;

    match output_format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if response.removed {
                println!("Removed group {}", title);
            } else {
                println!("No group named {}", title);
            }
        }
    }
    Ok(())
}

async fn handle_workers_list(
    client: &ApiClient,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let workers: Vec<WorkerSummary> = client.get("/api/workers", &[]).await?;

    match output_format {
        OutputFormat::Json => print_json(&workers)?,
        OutputFormat::Table => {
            if workers.is_empty() {
                println!("No workers registered.");
            } else {
                println!("{:<46} {:<20} {:<10} JOB", "ADDRESS", "HOST", "STATE");
                println!("{}", "-".repeat(100));
                for worker in &workers {
                    let job = worker
                        .current_job
                        .as_ref()
                        .map(|j| j.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<46} {:<20} {:<10} {}",
                        worker.address, worker.environment.computer_name, worker.state, job
                    );
                }
            }
        }
    }
    Ok(())
}

/// Percent-encode a path segment. Group titles are usually repository URLs.
fn urlencode(segment: &str) -> String {
    segment
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Jobs { client, command } => {
            let api = ApiClient::new(&client)?;
            match command {
                JobCommands::Add {
                    repository,
                    commit_hashes,
                } => {
                    handle_jobs_add(&api, repository, commit_hashes, &client.output).await?;
                }
                JobCommands::Prioritize {
                    group_title,
                    job_id,
                } => {
                    handle_jobs_prioritize(&api, group_title, job_id, &client.output).await?;
                }
            }
        }
        Commands::Queue { client, command } => {
            let api = ApiClient::new(&client)?;
            match command {
                QueueCommands::Show { page, size } => {
                    handle_queue_show(&api, page, size, &client.output).await?;
                }
            }
        }
        Commands::Groups { client, command } => {
            let api = ApiClient::new(&client)?;
            match command {
                GroupCommands::List => handle_groups_list(&api, &client.output).await?,
                GroupCommands::Remove { title } => {
                    handle_groups_remove(&api, title, &client.output).await?;
                }
            }
        }
        Commands::Workers { client, command } => {
            let api = ApiClient::new(&client)?;
            match command {
                WorkerCommands::List => handle_workers_list(&api, &client.output).await?,
            }
        }
    }

    Ok(())
}
