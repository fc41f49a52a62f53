//! canvas-bulk - paced bulk operations against the Canvas LMS API
//!
//! Lists paginated collections (REST link headers or GraphQL cursors) and
//! runs one templated request per id in fixed-size concurrent windows.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "canvas-bulk")]
#[command(about = "Paced bulk operations against the Canvas LMS API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./canvas-bulk.toml or ~/.config/canvas-bulk/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Concurrent requests per window
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Milliseconds to wait between windows
    #[arg(long, global = true)]
    delay_ms: Option<u64>,

    /// Maximum retry attempts for transient failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// List every item of a link-paginated REST collection
    List(cmd::list::ListArgs),
    /// Walk every node of a cursor-paginated GraphQL connection
    Graphql(cmd::graphql::GraphqlArgs),
    /// Send one templated request per id in paced windows
    Bulk(cmd::bulk::BulkArgs),
    /// Show current configuration
    Config,
}

/// Show only the last four characters of a token.
fn mask_token(token: Option<&str>) -> String {
    match token {
        None => "not set".to_string(),
        Some(t) if t.chars().count() <= 8 => "configured".to_string(),
        Some(t) => {
            let skip = t.chars().count() - 4;
            format!("****{}", t.chars().skip(skip).collect::<String>())
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["REST base URL", &config.api.base_url]);
    table.add_row(vec!["GraphQL URL", &config.api.graphql_endpoint()]);
    table.add_row(vec!["API token", &mask_token(config.api.token.as_deref())]);
    table.add_row(vec![
        "Timeouts",
        &format!(
            "{}s (connect {}s)",
            config.api.timeout_secs, config.api.connect_timeout_secs
        ),
    ]);
    table.add_row(vec!["Batch size", &config.batch.batch_size.to_string()]);
    table.add_row(vec![
        "Inter-batch delay",
        &format!("{}ms", config.batch.inter_batch_delay_ms),
    ]);
    table.add_row(vec!["Max retries", &config.retry.max_retries.to_string()]);
    table.add_row(vec![
        "Retry base delay",
        &format!("{}ms", config.retry.base_delay_ms),
    ]);

    eprintln!("\n{table}");
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(canvas_bulk_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    canvas_bulk_core::init_logging(quiet, cli.debug, multi);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    // CLI flags override the config file
    if let Some(n) = cli.batch_size {
        config.batch.batch_size = n;
    }
    if let Some(ms) = cli.delay_ms {
        config.batch.inter_batch_delay_ms = ms;
    }
    if let Some(n) = cli.max_retries {
        config.retry.max_retries = n;
    }

    match cli.command {
        Command::List(args) => {
            cmd::list::run(args, &config, &progress).map(|()| ExitCode::SUCCESS)
        }
        Command::Graphql(args) => {
            cmd::graphql::run(args, &config, &progress).map(|()| ExitCode::SUCCESS)
        }
        Command::Bulk(args) => cmd::bulk::run(args, &config, &progress),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}
