use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use server::admin_client::{AdminClient, ClientError};
use server::routes::admin::RebuildBody;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "search-indexctl",
    about = "Inspect and operate hybrid search index versions"
)]
struct Cli {
    /// Base URL of the search server
    #[arg(
        long,
        global = true,
        env = "SEARCH_INDEXCTL_SERVER",
        default_value = "http://127.0.0.1:8080"
    )]
    server: String,

    /// Logical index name
    #[arg(long, global = true, env = "SEARCH_INDEXCTL_INDEX", default_value = "clips")]
    index: String,

    /// Print the raw JSON response
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show versions, states and the current alias
    Status,
    /// Build a new version from the source of truth
    Rebuild {
        /// Leave the new version READY instead of promoting it
        #[arg(long, default_value_t = false)]
        no_swap: bool,
        /// Report counts without building
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Promote a READY version (the newest when omitted)
    Swap {
        #[arg(long)]
        version: Option<u32>,
    },
    /// Re-activate a retained RETIRED version (the newest when omitted)
    Rollback {
        #[arg(long)]
        version: Option<u32>,
    },
    /// Delete RETIRED versions past retention
    Cleanup,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn emit<T: Serialize>(json: bool, value: &T, summary: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", summary(value));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let client = AdminClient::new(&cli.server);
    let index = cli.index.as_str();
    tracing::debug!(server = %cli.server, index, command = ?cli.command, "indexctl");

    let printed = match cli.command {
        Command::Status => {
            let status = client.status(index).await?;
            emit(cli.json, &status, |s| {
                let mut out = format!(
                    "{}: active={} generation={} building={}",
                    s.index,
                    s.active_version
                        .map(|v| format!("v{v}"))
                        .unwrap_or_else(|| "none".into()),
                    s.alias_generation.unwrap_or(0),
                    s.building
                );
                for v in &s.versions {
                    out.push_str(&format!(
                        "\n  {:<12} {:<8} docs={} embedded={} age={}s{}",
                        v.physical_name,
                        v.state,
                        v.doc_count,
                        v.embedded_count,
                        v.age_secs,
                        if v.rollback_eligible { " (rollback)" } else { "" }
                    ));
                }
                out
            })
        }
        Command::Rebuild { no_swap, dry_run } => {
            let body = RebuildBody {
                swap: !no_swap,
                dry_run,
                batch_size: None,
            };
            let report = client.rebuild(index, &body).await?;
            emit(cli.json, &report, |r| {
                if r.dry_run {
                    format!("{}: would index {} items ({} embedded)", r.index, r.doc_count, r.embedded_count)
                } else {
                    format!(
                        "{}: built {} with {} items in {}ms, swapped={}",
                        r.index, r.physical_name, r.doc_count, r.duration_ms, r.swapped
                    )
                }
            })
        }
        Command::Swap { version } => {
            let outcome = client.swap(index, version).await?;
            emit(cli.json, &outcome, |o| {
                format!("{}: alias -> v{} (generation {})", o.index, o.to, o.generation)
            })
        }
        Command::Rollback { version } => {
            let outcome = client.rollback(index, version).await?;
            emit(cli.json, &outcome, |o| {
                format!("{}: rolled back to v{} (generation {})", o.index, o.to, o.generation)
            })
        }
        Command::Cleanup => {
            let report = client.cleanup(index).await?;
            emit(cli.json, &report, |r| format!("{}: removed {:?}", r.index, r.removed))
        }
    };

    if let Err(err) = printed {
        tracing::error!(error = %err, "could not print response");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
