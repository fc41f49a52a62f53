//! GraphQL subcommand - walk a cursor-paginated connection

use std::path::PathBuf;

use anyhow::{Context, Result};
use canvas_bulk_core::progress::fmt_num;
use canvas_bulk_core::{
    ApiClient, CursorQuery, ProgressEvent, ProgressSink, SHARED_RUNTIME, SharedProgress,
    fetch_all_cursor,
};
use clap::Args;
use serde_json::Value;

use super::report::print_summary;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct GraphqlArgs {
    /// File containing the GraphQL query
    #[arg(short, long)]
    pub query_file: PathBuf,

    /// Dotted path from `data` to the connection, e.g. course.assignmentsConnection
    #[arg(short, long)]
    pub path: String,

    /// Query variable as NAME=VALUE (VALUE parsed as JSON, else taken as a string)
    #[arg(long = "var", value_parser = parse_var)]
    pub vars: Vec<(String, Value)>,

    /// Variable that receives the page cursor
    #[arg(long, default_value = "cursor")]
    pub cursor_var: String,

    /// Print every node as one JSON line on stdout
    #[arg(long)]
    pub json: bool,
}

fn parse_var(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

pub fn run(args: GraphqlArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let text = std::fs::read_to_string(&args.query_file)
        .with_context(|| format!("Cannot read {}", args.query_file.display()))?;

    let mut query = CursorQuery::new(text, args.path.clone()).cursor_variable(args.cursor_var);
    for (name, value) in args.vars {
        query = query.variable(name, value);
    }

    let client =
        ApiClient::new(&config.api.client_settings()).context("Failed to build HTTP client")?;
    let sink = progress.sink("graphql");
    let nodes = SHARED_RUNTIME
        .block_on(fetch_all_cursor(
            &client,
            &config.api.graphql_endpoint(),
            &query,
            sink.as_ref(),
        ))
        .with_context(|| format!("Failed to walk {}", args.path))?;
    sink.report(ProgressEvent::Done);

    if args.json {
        for node in &nodes {
            println!("{node}");
        }
    }
    print_summary(
        "GraphQL",
        &[
            ("Connection", args.path),
            ("Nodes", fmt_num(nodes.len())),
        ],
    );
    Ok(())
}
