//! Bulk subcommand - one templated request per id, run in paced windows

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use canvas_bulk_core::{
    ApiClient, BatchConfig, CancellationGuard, CancellationRegistry, RetryPolicy, SHARED_RUNTIME,
    SharedProgress, Task, TaskError, run_batches, with_retry_when,
};
use clap::{Args, ValueEnum};
use reqwest::Method;
use serde_json::Value;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::{SigId, flag};

use super::list::fetch_items;
use super::report::print_result;
use crate::config::Config;

/// Placeholder replaced by each id in the endpoint template
const ID_PLACEHOLDER: &str = "{id}";

/// Exit code for a run stopped by SIGINT/SIGTERM
const EXIT_CANCELLED: u8 = 130;

#[derive(Args, Debug)]
pub struct BulkArgs {
    /// Endpoint template containing {id}, e.g. courses/101/assignments/{id}
    #[arg(short, long)]
    pub template: String,

    /// HTTP method sent for every id
    #[arg(short, long, value_enum, default_value = "delete")]
    pub method: BulkMethod,

    /// JSON body sent with every request
    #[arg(long)]
    pub body: Option<String>,

    /// Comma-separated ids
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["ids_file", "from"])]
    pub ids: Vec<String>,

    /// File with one id per line (blank lines and # comments skipped)
    #[arg(long, conflicts_with = "from")]
    pub ids_file: Option<PathBuf>,

    /// Collection path whose items supply the ids
    #[arg(long)]
    pub from: Option<String>,

    /// Item field holding the id when using --from
    #[arg(long, default_value = "id")]
    pub id_field: String,

    /// Print the requests without sending them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum BulkMethod {
    Delete,
    Put,
    Post,
}

impl From<BulkMethod> for Method {
    fn from(m: BulkMethod) -> Self {
        match m {
            BulkMethod::Delete => Method::DELETE,
            BulkMethod::Put => Method::PUT,
            BulkMethod::Post => Method::POST,
        }
    }
}

/// Substitute one id into the endpoint template
pub fn render_template(template: &str, id: &str) -> String {
    template.replace(ID_PLACEHOLDER, id)
}

/// Read ids from a file, one per line
pub fn read_ids_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Pull `field` out of each listed item; numbers and strings both count.
pub fn extract_ids(items: &[Value], field: &str) -> Vec<String> {
    let mut missing = 0usize;
    let ids: Vec<String> = items
        .iter()
        .filter_map(|item| match item.get(field) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => {
                missing += 1;
                None
            }
        })
        .collect();
    if missing > 0 {
        log::warn!("{missing} items have no usable '{field}' field, skipped");
    }
    ids
}

/// Which failures may be resent for `method`.
///
/// A timed-out POST may already have been applied, so non-idempotent
/// methods only retry responses the server rejected without processing.
pub fn retry_condition(method: &Method) -> fn(&TaskError) -> bool {
    if method.is_idempotent() {
        TaskError::is_retryable
    } else {
        TaskError::is_rejected_unprocessed
    }
}

/// One retried request per id
pub fn build_tasks(
    client: &ApiClient,
    template: &str,
    method: Method,
    body: Option<Value>,
    ids: Vec<String>,
    policy: RetryPolicy,
) -> Vec<Task<String, Value>> {
    ids.into_iter()
        .map(|id| {
            let client = client.clone();
            let method = method.clone();
            let body = body.clone();
            let path = render_template(template, &id);
            let should_retry = retry_condition(&method);
            Task::new(id, move || async move {
                let label = format!("{method} {path}");
                with_retry_when(policy, &label, should_retry, || {
                    client.request_json(method.clone(), &path, body.as_ref())
                })
                .await
            })
        })
        .collect()
}

/// Route termination signals to the session flag. A second signal exits immediately.
fn bind_signals(session: &CancellationGuard) -> Result<Vec<SigId>> {
    let cancel = session.flag();
    let mut ids = Vec::with_capacity(TERM_SIGNALS.len() * 2);
    for &sig in TERM_SIGNALS {
        ids.push(
            flag::register_conditional_shutdown(sig, i32::from(EXIT_CANCELLED), cancel.clone())
                .context("Failed to register signal handler")?,
        );
        ids.push(
            flag::register(sig, cancel.clone()).context("Failed to register signal handler")?,
        );
    }
    Ok(ids)
}

fn collect_ids(
    args: &BulkArgs,
    client: &ApiClient,
    progress: &SharedProgress,
) -> Result<Vec<String>> {
    if !args.ids.is_empty() {
        return Ok(args.ids.clone());
    }
    if let Some(path) = &args.ids_file {
        return read_ids_file(path);
    }
    if let Some(from) = &args.from {
        let sink = progress.sink("list");
        let items = fetch_items(client, from, 100, sink.as_ref())?;
        log::info!("{from}: {} items listed", items.len());
        return Ok(extract_ids(&items, &args.id_field));
    }
    anyhow::bail!("One of --ids, --ids-file or --from is required")
}

pub fn run(args: BulkArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    anyhow::ensure!(
        args.template.contains(ID_PLACEHOLDER),
        "Template must contain {ID_PLACEHOLDER}: {}",
        args.template
    );
    let body: Option<Value> = args
        .body
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--body is not valid JSON")?;
    let method = Method::from(args.method);

    let client =
        ApiClient::new(&config.api.client_settings()).context("Failed to build HTTP client")?;
    let ids = collect_ids(&args, &client, progress)?;
    anyhow::ensure!(!ids.is_empty(), "No ids to process");
    let total = ids.len();

    if args.dry_run {
        for id in &ids {
            println!("{method} {}", client.url(&render_template(&args.template, id)));
        }
        log::info!("Dry run: {total} requests not sent");
        return Ok(ExitCode::SUCCESS);
    }

    let registry = Arc::new(CancellationRegistry::new());
    let session = registry.register(format!("bulk-{}", std::process::id()));
    let signal_ids = bind_signals(&session)?;

    let batch = BatchConfig::new(config.batch.batch_size)
        .with_delay(std::time::Duration::from_millis(config.batch.inter_batch_delay_ms))
        .with_cancellation(session.predicate());
    log::info!(
        "{method} {}: {total} ids, batch size {}, delay {:?}",
        args.template,
        batch.batch_size,
        batch.inter_batch_delay
    );

    let tasks = build_tasks(
        &client,
        &args.template,
        method,
        body,
        ids,
        config.retry.policy(),
    );
    let sink = progress.sink("bulk");
    let outcome = SHARED_RUNTIME.block_on(run_batches(tasks, &batch, &sink));

    for id in signal_ids {
        signal_hook::low_level::unregister(id);
    }
    drop(session);
    let result = outcome?;

    print_result("Bulk", &result, total);
    if result.cancelled {
        log::warn!("Cancelled by request");
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    if !result.failed.is_empty() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn template_substitution() {
        assert_eq!(
            render_template("courses/1/assignments/{id}", "42"),
            "courses/1/assignments/42"
        );
        assert_eq!(
            render_template("users/{id}/communication_channels", "sis_user_id:abc"),
            "users/sis_user_id:abc/communication_channels"
        );
    }

    #[test]
    fn ids_file_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# assignments to purge\n11\n\n  12  \n#13\n14").unwrap();
        assert_eq!(read_ids_file(file.path()).unwrap(), vec!["11", "12", "14"]);
    }

    #[test]
    fn extract_ids_numbers_and_strings() {
        let items = vec![
            json!({"id": 1}),
            json!({"id": "2"}),
            json!({"name": "no id"}),
            json!({"id": null}),
        ];
        assert_eq!(extract_ids(&items, "id"), vec!["1", "2"]);
    }

    #[test]
    fn method_conversion() {
        assert_eq!(Method::from(BulkMethod::Delete), Method::DELETE);
        assert_eq!(Method::from(BulkMethod::Put), Method::PUT);
    }

    #[test]
    fn post_never_resends_after_network_error() {
        let timeout = TaskError::network("operation timed out");
        assert!(!retry_condition(&Method::POST)(&timeout));
        assert!(retry_condition(&Method::POST)(&TaskError::http(429, "slow down")));
        assert!(retry_condition(&Method::DELETE)(&timeout));
        assert!(retry_condition(&Method::PUT)(&TaskError::http(500, "oops")));
        assert!(!retry_condition(&Method::POST)(&TaskError::http(500, "oops")));
    }

    #[test]
    fn build_tasks_keeps_ids_in_order() {
        let settings = crate::config::ApiConfig::default().client_settings();
        let client = ApiClient::new(&settings).unwrap();
        let tasks = build_tasks(
            &client,
            "courses/1/assignments/{id}",
            Method::DELETE,
            None,
            vec!["3".to_string(), "1".to_string(), "2".to_string()],
            RetryPolicy::none(),
        );
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }
}
