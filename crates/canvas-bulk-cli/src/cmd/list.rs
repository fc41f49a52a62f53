//! List subcommand - walk a link-paginated REST collection

use anyhow::{Context, Result};
use canvas_bulk_core::progress::fmt_num;
use canvas_bulk_core::{
    ApiClient, ProgressEvent, ProgressSink, SHARED_RUNTIME, SharedProgress, fetch_all_linked,
};
use clap::Args;
use serde_json::Value;

use super::report::print_summary;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Collection path relative to the API base, e.g. courses/101/assignments
    pub path: String,

    /// Items per page requested from the server
    #[arg(long, default_value_t = 100)]
    pub per_page: u32,

    /// Print every item as one JSON line on stdout
    #[arg(long)]
    pub json: bool,
}

/// Append `per_page` unless the path already sets it.
pub fn with_per_page(path: &str, per_page: u32) -> String {
    if path.contains("per_page=") {
        return path.to_string();
    }
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{path}{sep}per_page={per_page}")
}

/// Walk every page of `path`.
pub fn fetch_items(
    client: &ApiClient,
    path: &str,
    per_page: u32,
    sink: &dyn ProgressSink,
) -> Result<Vec<Value>> {
    let url = with_per_page(path, per_page);
    let items = SHARED_RUNTIME
        .block_on(fetch_all_linked(client, &url, sink))
        .with_context(|| format!("Failed to list {path}"))?;
    sink.report(ProgressEvent::Done);
    Ok(items)
}

pub fn run(args: ListArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let client =
        ApiClient::new(&config.api.client_settings()).context("Failed to build HTTP client")?;
    let sink = progress.sink("list");
    let items = fetch_items(&client, &args.path, args.per_page, sink.as_ref())?;

    if args.json {
        for item in &items {
            println!("{item}");
        }
    }
    print_summary(
        "List",
        &[
            ("Path", args.path),
            ("Items", fmt_num(items.len())),
        ],
    );
    Ok(())
}
