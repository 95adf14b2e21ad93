//! vmci CLI - submit and inspect build tasks on a dispatcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use vmci_client::DispatcherClient;
use vmci_core::{Configuration, Task, TaskConfiguration, TaskId, TaskShellRecord};

const DEFAULT_SERVER: &str = "http://localhost:8080";

/// vmci CLI - dispatcher management tool
#[derive(Parser)]
#[command(name = "vmci")]
#[command(about = "CLI for the vmci dispatcher", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.vmci.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dispatcher base URL, overrides `cli.server`
    #[arg(short, long)]
    server: Option<String>,

    /// Print raw JSON instead of tables
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new task
    Submit {
        /// Machine (box) name to run on
        #[arg(short, long)]
        machine: String,

        /// File with the checkout script
        #[arg(long)]
        checkout: Option<PathBuf>,

        /// File with the test script
        #[arg(long)]
        test: Option<PathBuf>,

        /// File with the secret startup script (never recorded)
        #[arg(long)]
        secret: Option<PathBuf>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        commit: Option<String>,

        /// Wait for the task to finish and print its output
        #[arg(short, long)]
        wait: bool,
    },

    /// List all tasks, newest first
    List,

    /// Show one task
    Show {
        /// Task ID
        id: String,
    },

    /// Print the recorded shell output of a task
    Shell {
        /// Task ID
        id: String,
    },

    /// List workers and their liveness
    Workers,

    /// Check dispatcher health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let configuration = Configuration::load_or_default(cli.config.as_deref())?;
    let server = match cli.server {
        Some(server) => server,
        None => configuration.get_or("cli.server", DEFAULT_SERVER.to_string())?,
    };
    let client = DispatcherClient::new(&server)?;

    match cli.command {
        Commands::Submit {
            machine,
            checkout,
            test,
            secret,
            project,
            commit,
            wait,
        } => {
            let mut configuration = TaskConfiguration::new(machine);
            if let Some(path) = checkout {
                configuration = configuration.with_checkout_script(read_script(&path)?);
            }
            if let Some(path) = test {
                configuration = configuration.with_test_script(read_script(&path)?);
            }
            if let Some(path) = secret {
                configuration = configuration.with_secret_startup_script(read_script(&path)?);
            }

            let task = client.create_task(configuration, project, commit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("Task created:");
                print_task(&task);
            }

            if wait {
                let task = wait_for_task(&client, &task.id).await?;
                print_shell(&client.task_shell(&task.id).await?);
                println!("Task {} {}", task.id, task.state.as_str());
                if let Some(code) = task.exit_code.filter(|code| *code != 0) {
                    std::process::exit(code);
                }
            }
        }
        Commands::List => {
            let tasks = client.list_tasks().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                list_tasks(&tasks);
            }
        }
        Commands::Show { id } => {
            let task = client.get_task(&TaskId::new(id)).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print_task(&task);
            }
        }
        Commands::Shell { id } => {
            let records = client.task_shell(&TaskId::new(id)).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_shell(&records);
            }
        }
        Commands::Workers => {
            let workers = client.list_workers().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&workers)?);
            } else {
                println!("Workers ({}):", workers.len());
                println!("{:<36}  {:<6}  {}", "ID", "ALIVE", "LAST KEEP-ALIVE");
                println!("{}", "-".repeat(80));
                for worker in workers {
                    let alive = if worker.alive { "yes" } else { "no" };
                    println!("{:<36}  {:<6}  {}", worker.worker_id, alive, worker.last_keep_alive);
                }
            }
        }
        Commands::Health => {
            if client.health().await? {
                println!("Dispatcher at {} is healthy", client.base_url());
            } else {
                eprintln!("Dispatcher at {} is unhealthy", client.base_url());
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn read_script(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read script {}: {e}", path.display()).into())
}

async fn wait_for_task(
    client: &DispatcherClient,
    task_id: &TaskId,
) -> Result<Task, Box<dyn std::error::Error>> {
    loop {
        let task = client.get_task(task_id).await?;
        if task.is_terminal() {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn list_tasks(tasks: &[Task]) {
    println!("Tasks ({}):", tasks.len());
    println!("{:<36}  {:<10}  {:<16}  {}", "ID", "STATE", "MACHINE", "CREATED");
    println!("{}", "-".repeat(80));

    for task in tasks {
        println!(
            "{:<36}  {:<10}  {:<16}  {}",
            task.id,
            task.state.as_str(),
            task.configuration.machine,
            format_timestamp(&task.created_at)
        );
    }
}

fn print_task(task: &Task) {
    println!("  ID:         {}", task.id);
    println!("  Machine:    {}", task.configuration.machine);
    println!("  State:      {}", task.state.as_str());
    println!("  Created:    {}", format_timestamp(&task.created_at));

    if let Some(project) = &task.project {
        println!("  Project:    {}", project);
    }
    if let Some(commit) = &task.commit {
        println!("  Commit:     {}", commit);
    }
    if let Some(worker_id) = &task.worker_id {
        println!("  Worker:     {}", worker_id);
    }
    if let Some(started_at) = &task.started_at {
        println!("  Started:    {}", format_timestamp(started_at));
    }
    if let Some(finished_at) = &task.finished_at {
        println!("  Finished:   {}", format_timestamp(finished_at));
    }
    if let Some(exit_code) = task.exit_code {
        println!("  Exit code:  {}", exit_code);
    }
}

fn print_shell(records: &[TaskShellRecord]) {
    for record in records {
        print!("{}", record.output);
        if !record.output.is_empty() && !record.output.ends_with('\n') {
            println!();
        }
    }
}

fn format_timestamp(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
