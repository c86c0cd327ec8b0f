//! Tasklink CLI: query and update assigned tasks through a task server.

mod render;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tasklink_config::{CliOverrides, TasklinkConfig};
use tasklink_mcp::{Implementation, McpClient};
use tasklink_tasks::{TaskQuery, TaskService, TaskStatus, TaskUpdate};

#[derive(Parser)]
#[command(name = "tasklink", version, about = "Query and update assigned tasks")]
struct Cli {
    /// Command that launches the task server (default: python)
    #[arg(long, global = true)]
    server_command: Option<String>,

    /// Server script passed as the first argument to the command
    #[arg(long, global = true)]
    server_script: Option<PathBuf>,

    /// Working directory for the server process
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the tools the server exposes
    Tools,

    /// List tasks assigned to a user
    Tasks {
        /// Username (overrides TASKLINK_USERNAME)
        #[arg(long)]
        user: Option<String>,

        /// Only tasks in this status (e.g. in_progress)
        #[arg(long)]
        status: Option<TaskStatus>,

        /// Only tasks with this priority
        #[arg(long)]
        priority: Option<String>,
    },

    /// Update a task's status, dates or logged hours
    Update {
        task_id: i64,

        #[arg(long)]
        status: Option<TaskStatus>,

        /// Start date, YYYY-MM-DD
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Due date, YYYY-MM-DD
        #[arg(long)]
        due_date: Option<NaiveDate>,

        #[arg(long)]
        actual_hours: Option<f64>,
    },

    /// Call any tool with JSON arguments and print its result
    Call {
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let username = match &cli.command {
        Command::Tasks { user, .. } => user.clone(),
        _ => None,
    };
    let config = TasklinkConfig::load(CliOverrides {
        command: cli.server_command,
        script: cli.server_script,
        working_dir: cli.working_dir,
        username,
        timeout_ms: cli.timeout_ms,
    })
    .context("Failed to load configuration")?;

    let client = McpClient::connect(config.server_name.clone(), &config.server)
        .context("Failed to start task server")?;
    let client = Arc::new(client);

    let outcome = run(&client, &config, cli.command).await;
    client.disconnect().await;
    outcome
}

async fn run(client: &Arc<McpClient>, config: &TasklinkConfig, command: Command) -> Result<()> {
    let info = client
        .initialize(&Implementation::default())
        .await
        .context("Handshake with task server failed")?;
    if let Some(server) = &info.server_info {
        tracing::debug!(name = %server.name, version = %server.version, "Connected");
    }

    let service = TaskService::new(Arc::clone(client));
    let output = match command {
        Command::Tools => {
            let tools = client.list_tools().await?;
            render::tools_table(&tools)
        }
        Command::Tasks {
            status, priority, ..
        } => {
            let username = config.require_username()?;
            let query = TaskQuery {
                status,
                priority,
                ..TaskQuery::new(username)
            };
            let tasks = service.query_tasks(&query).await?;
            render::tasks_table(&tasks)
        }
        Command::Update {
            task_id,
            status,
            start_date,
            due_date,
            actual_hours,
        } => {
            let update = TaskUpdate {
                status,
                start_date,
                due_date,
                actual_hours,
                ..TaskUpdate::new(task_id)
            };
            if update.is_empty() {
                bail!("Nothing to update: pass --status, --start-date, --due-date or --actual-hours");
            }
            if !service.update_task(&update).await? {
                bail!("Server did not confirm the update of task {task_id}");
            }
            format!("Updated task {task_id}\n")
        }
        Command::Call { tool, args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object");
            }
            let result = client.call_tool(&tool, arguments).await?;
            render::tool_result(&result)
        }
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
