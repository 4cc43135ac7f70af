use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::hub::platform::PlatformFilter;

#[derive(Parser, Debug)]
#[command(
    name = "messagehub",
    version,
    about = "Consolidate exported chat, mail and voice archives into one local store"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract pending archives, then scan and store every message found.
    Ingest {
        /// Archive file or directory to ingest instead of the workspace.
        #[arg(long, value_name = "PATH")]
        source: Option<PathBuf>,
        /// Store path; overrides MESSAGEHUB_DB.
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        #[arg(long, default_value_t = PlatformFilter::All)]
        platform: PlatformFilter,
        /// Delete archives after extraction instead of moving them aside.
        #[arg(long)]
        delete_archives: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show resolved paths, configured variables and store counts.
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}: {}", report.command, if report.ok { "ok" } else { "failed" });
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let (report, json) = match cli.command {
        Command::Ingest {
            source,
            db,
            platform,
            delete_archives,
            json,
        } => {
            let opts = commands::ingest::IngestOptions {
                source,
                db,
                platform,
                delete_archives,
            };
            (commands::ingest::run(&opts)?, json)
        }
        Command::Status { json } => (commands::status::run()?, json),
    };

    render(&report, json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
