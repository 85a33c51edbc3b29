// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tf - submit messages, dispatch and track background tasks

mod client;
mod client_lifecycle;
mod color;
mod daemon;
mod daemon_process;
mod env;
mod exit_error;
mod help;
mod output;
mod table;

use output::OutputFormat;

use anyhow::{anyhow, Result};
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use tf_core::{InputKind, Priority, TaskState, UserId};

use crate::client::DaemonClient;

#[derive(Parser)]
#[command(
    name = "tf",
    version,
    disable_version_flag = true,
    about = "tf - submit messages, dispatch and track background tasks"
)]
struct Cli {
    /// Output format
    #[arg(
        short = 'o',
        long = "output",
        value_enum,
        default_value_t,
        global = true
    )]
    output: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a message and either get an answer or dispatch a task
    Submit {
        /// Message content
        content: String,
        /// User the message is submitted on behalf of
        #[arg(long, short = 'u')]
        user: Option<String>,
        /// How the message was captured
        #[arg(long, value_parser = parse_input_kind, default_value = "text")]
        input_kind: InputKind,
        /// Dispatch priority if a task is created
        #[arg(long, value_parser = parse_priority, default_value = "normal")]
        priority: Priority,
    },
    /// Stop a running task
    Stop {
        /// Task ID (prefix match)
        task_id: String,
    },
    /// Stop every task for a user
    #[command(name = "stop-all")]
    StopAll {
        #[arg(long, short = 'u')]
        user: Option<String>,
    },
    /// Clear a user's session history
    Clear {
        #[arg(long, short = 'u')]
        user: Option<String>,
    },
    /// List tasks, optionally filtered by user or state
    List {
        #[arg(long, short = 'u')]
        user: Option<String>,
        #[arg(long, value_parser = parse_task_state)]
        state: Option<TaskState>,
    },
    /// Show a single task's details
    Show {
        /// Task ID (prefix match)
        task_id: String,
    },
    /// Stream live task/tool-event/metrics updates
    Watch {
        /// Channel to subscribe to: tasks, tools, or metrics
        #[arg(value_parser = parse_channel, default_value = "tasks")]
        channel: tf_daemon::Channel,
        /// Subscribe to every user's events instead of just one user's
        #[arg(long)]
        admin: bool,
        #[arg(long, short = 'u')]
        user: Option<String>,
    },
    /// Show daemon status (uptime, queue depth, worker load)
    Status,
    /// Daemon management
    Daemon(daemon::DaemonArgs),
}

fn parse_input_kind(s: &str) -> Result<InputKind, String> {
    match s {
        "text" => Ok(InputKind::Text),
        "voice" => Ok(InputKind::Voice),
        "image" => Ok(InputKind::Image),
        other => Err(format!("unknown input kind: {other}")),
    }
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    match s {
        "urgent" => Ok(Priority::Urgent),
        "high" => Ok(Priority::High),
        "normal" => Ok(Priority::Normal),
        "low" => Ok(Priority::Low),
        other => Err(format!("unknown priority: {other}")),
    }
}

fn parse_task_state(s: &str) -> Result<TaskState, String> {
    match s {
        "pending" => Ok(TaskState::Pending),
        "running" => Ok(TaskState::Running),
        "completed" => Ok(TaskState::Completed),
        "failed" => Ok(TaskState::Failed),
        "stopped" => Ok(TaskState::Stopped),
        other => Err(format!("unknown task state: {other}")),
    }
}

fn parse_channel(s: &str) -> Result<tf_daemon::Channel, String> {
    match s {
        "tasks" => Ok(tf_daemon::Channel::Tasks),
        "tools" => Ok(tf_daemon::Channel::Tools),
        "metrics" => Ok(tf_daemon::Channel::Metrics),
        other => Err(format!("unknown channel: {other}")),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let code = e
            .downcast_ref::<exit_error::ExitError>()
            .map_or(1, |c| c.code);
        eprintln!("Error: {}", e);
        std::process::exit(code);
    }
}

fn cli_command() -> clap::Command {
    Cli::command()
        .help_template(help::template())
        .before_help(help::commands())
        .after_help(help::after_help())
        .styles(help::styles())
        .arg(
            clap::Arg::new("version")
                .short('v')
                .short_alias('V')
                .long("version")
                .action(clap::ArgAction::Version)
                .help("Print version"),
        )
}

async fn run() -> Result<()> {
    let matches = match cli_command().try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            if e.kind() == clap::error::ErrorKind::DisplayHelp {
                let args: Vec<String> = std::env::args().collect();
                print_formatted_help(&args);
                return Ok(());
            }
            e.exit();
        }
    };
    let cli = Cli::from_arg_matches(&matches)?;
    let format = cli.output;

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            help::print_help(cli_command());
            return Ok(());
        }
    };

    match command {
        Commands::Submit {
            content,
            user,
            input_kind,
            priority,
        } => {
            let client = DaemonClient::for_action()?;
            submit(&client, resolve_user(user), content, input_kind, priority, format).await
        }
        Commands::Stop { task_id } => {
            let client = DaemonClient::for_action()?;
            client.stop_task(&task_id).await?;
            println!("Stopped {}", task_id);
            Ok(())
        }
        Commands::StopAll { user } => {
            let client = DaemonClient::for_action()?;
            client.stop_all_user_tasks(resolve_user(user)).await?;
            println!("Stopped all tasks");
            Ok(())
        }
        Commands::Clear { user } => {
            let client = DaemonClient::for_action()?;
            client.clear_session(resolve_user(user)).await?;
            println!("Session cleared");
            Ok(())
        }
        Commands::List { user, state } => {
            let client = DaemonClient::for_query()?;
            let tasks = client.list_tasks(user.map(UserId::new), state).await?;
            list(&tasks, format)
        }
        Commands::Show { task_id } => {
            let client = DaemonClient::for_query()?;
            match client.get_task(&task_id).await? {
                Some(task) => show(&task, format),
                None => {
                    Err(exit_error::ExitError::new(1, format!("no such task: {task_id}")).into())
                }
            }
        }
        Commands::Watch {
            channel,
            admin,
            user,
        } => {
            let client = DaemonClient::for_query()?;
            let scope = if admin {
                tf_daemon::Scope::Admin
            } else {
                tf_daemon::Scope::User(resolve_user(user))
            };
            watch(&client, scope, channel, format).await
        }
        Commands::Status => {
            daemon::daemon(
                daemon::DaemonArgs {
                    version: false,
                    command: Some(daemon::DaemonCommand::Status),
                },
                format,
            )
            .await
        }
        Commands::Daemon(args) => daemon::daemon(args, format).await,
    }
}

fn resolve_user(user: Option<String>) -> UserId {
    UserId::new(user.unwrap_or_else(crate::env::default_user))
}

async fn submit(
    client: &DaemonClient,
    user: UserId,
    content: String,
    input_kind: InputKind,
    priority: Priority,
    format: OutputFormat,
) -> Result<()> {
    use tf_daemon::protocol::Response;

    let response = client
        .submit_message(user, content, input_kind, priority)
        .await?;

    match (response, format) {
        (Response::Answer { text }, OutputFormat::Text) => println!("{}", text),
        (Response::Answer { text }, OutputFormat::Json) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "answer": text }))?
            );
        }
        (
            Response::Accepted {
                task_id,
                user_reply_text,
            },
            OutputFormat::Text,
        ) => {
            println!("{}", user_reply_text);
            println!("(task {})", task_id);
        }
        (
            Response::Accepted {
                task_id,
                user_reply_text,
            },
            OutputFormat::Json,
        ) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "task_id": task_id,
                    "reply": user_reply_text,
                }))?
            );
        }
        _ => return Err(anyhow!("unexpected response from daemon")),
    }
    Ok(())
}

fn list(tasks: &[tf_core::Task], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(tasks)?),
        OutputFormat::Text => {
            use table::{Column, Table};
            let mut t = Table::new(vec![
                Column::left("ID"),
                Column::left("USER"),
                Column::status("STATE"),
                Column::left("DESCRIPTION").with_max(60),
                Column::muted("UPDATED"),
            ]);
            for task in tasks {
                t.row(vec![
                    task.id.short(8).to_string(),
                    task.user_id.as_str().to_string(),
                    format!("{:?}", task.state).to_lowercase(),
                    task.description.clone(),
                    output::format_time_ago(task.updated_at.timestamp_millis().max(0) as u64),
                ]);
            }
            let mut stdout = std::io::stdout();
            t.render(&mut stdout);
            if tasks.is_empty() {
                println!("No tasks found.");
            }
        }
    }
    Ok(())
}

fn show(task: &tf_core::Task, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(task)?),
        OutputFormat::Text => {
            println!("ID:          {}", task.id);
            println!("User:        {}", task.user_id);
            println!("State:       {:?}", task.state);
            println!("Description: {}", task.description);
            println!("Model:       {}", task.model);
            println!("Branch:      {}", task.branch);
            println!("Workspace:   {}", task.workspace.display());
            println!("Created:     {}", task.created_at);
            println!("Updated:     {}", task.updated_at);
            if let Some(result) = &task.result {
                println!("Result:      {}", result);
            }
            if let Some(error) = &task.error {
                println!("Error:       {}", error);
            }
            if !task.activity_log.is_empty() {
                println!("\nActivity:");
                for entry in &task.activity_log {
                    println!("  [{}] {}", entry.timestamp, entry.message);
                }
            }
        }
    }
    Ok(())
}

async fn watch(
    client: &DaemonClient,
    scope: tf_daemon::Scope,
    channel: tf_daemon::Channel,
    format: OutputFormat,
) -> Result<()> {
    let mut stream = client.subscribe(scope, channel).await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            next = stream.next() => {
                match next? {
                    Some(envelope) => print_envelope(&envelope, format)?,
                    None => return Ok(()),
                }
            }
        }
    }
}

fn print_envelope(envelope: &tf_daemon::Envelope, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(envelope)?),
        OutputFormat::Text => println!(
            "[{}] #{} {:?}",
            envelope.timestamp, envelope.sequence, envelope.payload
        ),
    }
    Ok(())
}

/// Print help with post-hoc colorization, resolving the correct subcommand from args.
fn print_formatted_help(args: &[String]) {
    let cmd = cli_command();

    let non_flags: Vec<&String> = args
        .iter()
        .skip(1)
        .filter(|arg| !arg.starts_with('-'))
        .collect();

    let subcommand_names: Vec<&str> = if non_flags.first().map(|s| s.as_str()) == Some("help") {
        non_flags.iter().skip(1).map(|s| s.as_str()).collect()
    } else {
        non_flags.iter().map(|s| s.as_str()).collect()
    };

    let target_cmd = find_subcommand(cmd, &subcommand_names);
    help::print_help(target_cmd);
}

/// Recursively find a nested subcommand by name path.
pub(crate) fn find_subcommand(mut cmd: clap::Command, names: &[&str]) -> clap::Command {
    for name in names {
        let mut found_sub = None;
        for sub in cmd.get_subcommands() {
            if sub.get_name() == *name || sub.get_all_aliases().any(|a| a == *name) {
                found_sub = Some(sub.get_name().to_string());
                break;
            }
        }
        if let Some(sub_name) = found_sub {
            if let Some(sub) = cmd.find_subcommand_mut(&sub_name) {
                cmd = sub.clone();
            } else {
                break;
            }
        } else {
            break;
        }
    }
    cmd
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
