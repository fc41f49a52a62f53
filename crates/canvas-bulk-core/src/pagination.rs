//! Paginated fetch walkers.
//!
//! Both walkers accumulate until the remote resource reports no further page:
//! - link-header walker: REST collections exposing `Link: <..>; rel="next"`
//! - cursor walker: GraphQL connections exposing
//!   `pageInfo { hasNextPage endCursor }` with `nodes` or `edges[].node`

use rustc_hash::FxHashSet;
use serde_json::{Map, Value, json};

use crate::error::PaginationError;
use crate::http::{Transport, check_application_errors};
use crate::progress::{ProgressEvent, ProgressSink};

/// URL of the `rel="next"` entry in a `Link` header, if any.
///
/// Relations may be quoted or bare and may list several space-separated
/// values (`rel="next last"`). Commas inside `<...>` or inside quoted
/// parameter values do not separate entries. Malformed entries are skipped,
/// so a missing or broken header simply means "last page".
pub fn next_link(header: &str) -> Option<String> {
    let mut rest = header;
    loop {
        let open = rest.find('<')?;
        let target = &rest[open + 1..];
        let close = target.find('>')?;
        let url = &target[..close];
        let (params, tail) = split_entry(&target[close + 1..]);
        if !url.is_empty() && params.split(';').any(is_next_rel) {
            return Some(url.to_string());
        }
        rest = tail;
    }
}

/// Split link parameters at the first comma outside a quoted string.
fn split_entry(s: &str) -> (&str, &str) {
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => return (&s[..i], &s[i + 1..]),
            _ => {}
        }
    }
    (s, "")
}

fn is_next_rel(param: &str) -> bool {
    let Some((key, value)) = param.split_once('=') else {
        return false;
    };
    key.trim().eq_ignore_ascii_case("rel")
        && value
            .trim()
            .trim_matches('"')
            .split_ascii_whitespace()
            .any(|rel| rel.eq_ignore_ascii_case("next"))
}

/// Fetch every page of a link-paginated collection.
///
/// Each page body must be a JSON array; items are returned in page order.
/// A `next` link pointing at an already fetched page is an error.
pub async fn fetch_all_linked<C, P>(
    client: &C,
    url: &str,
    progress: &P,
) -> Result<Vec<Value>, PaginationError>
where
    C: Transport + ?Sized,
    P: ProgressSink + ?Sized,
{
    let mut items = Vec::new();
    let mut next = Some(url.to_string());
    let mut visited = FxHashSet::default();
    let mut page = 0usize;

    while let Some(current) = next.take() {
        if !visited.insert(current.clone()) {
            return Err(PaginationError::LinkCycle { url: current });
        }
        page += 1;
        progress.report(ProgressEvent::Indeterminate {
            label: format!("page {page} ({} items)", items.len()),
        });
        let response = client.get(&current).await?;
        match response.body {
            Value::Array(page_items) => items.extend(page_items),
            _ => {
                return Err(PaginationError::UnexpectedBody {
                    url: current,
                    expected: "a JSON array",
                });
            }
        }
        next = response.link.as_deref().and_then(next_link);
    }

    log::debug!("{url}: {} items from {page} pages", items.len());
    Ok(items)
}

/// GraphQL query walked page by page through one connection.
#[derive(Debug, Clone)]
pub struct CursorQuery {
    pub query: String,
    pub variables: Map<String, Value>,
    /// Dotted path from `data` to the connection, e.g. `course.assignmentsConnection`
    pub connection_path: String,
    /// Variable receiving `endCursor` for the next request
    pub cursor_variable: String,
}

impl CursorQuery {
    pub fn new(query: impl Into<String>, connection_path: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
            connection_path: connection_path.into(),
            cursor_variable: "cursor".to_string(),
        }
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn cursor_variable(mut self, name: impl Into<String>) -> Self {
        self.cursor_variable = name.into();
        self
    }
}

/// Follow a dotted path through nested objects. `null` counts as missing.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(root, |node, segment| node.get(segment))
        .filter(|node| !node.is_null())
}

/// One decoded connection page
struct ConnectionPage {
    items: Vec<Value>,
    end_cursor: Option<String>,
    has_next_page: bool,
}

fn read_connection(connection: &Value) -> Option<ConnectionPage> {
    let items = if let Some(nodes) = connection.get("nodes").and_then(Value::as_array) {
        nodes.clone()
    } else {
        connection
            .get("edges")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(|edge| edge.get("node").cloned())
            .collect()
    };
    let page_info = connection.get("pageInfo");
    Some(ConnectionPage {
        items,
        has_next_page: page_info
            .and_then(|p| p.get("hasNextPage"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        end_cursor: page_info
            .and_then(|p| p.get("endCursor"))
            .and_then(Value::as_str)
            .map(String::from),
    })
}

/// Fetch every node of a GraphQL connection by following `endCursor`.
pub async fn fetch_all_cursor<C, P>(
    client: &C,
    endpoint: &str,
    query: &CursorQuery,
    progress: &P,
) -> Result<Vec<Value>, PaginationError>
where
    C: Transport + ?Sized,
    P: ProgressSink + ?Sized,
{
    let path = query.connection_path.as_str();
    let mut variables = query.variables.clone();
    let mut items = Vec::new();
    let mut page = 0usize;

    loop {
        page += 1;
        progress.report(ProgressEvent::Indeterminate {
            label: format!("page {page} ({} items)", items.len()),
        });
        let request = json!({ "query": query.query, "variables": variables });
        let response = client.post_json(endpoint, &request).await?;
        check_application_errors(response.status, &response.body)?;

        let connection = response
            .body
            .get("data")
            .and_then(|data| resolve_path(data, path))
            .ok_or_else(|| PaginationError::ConnectionNotFound {
                path: path.to_string(),
            })?;
        let ConnectionPage {
            items: page_items,
            end_cursor,
            has_next_page,
        } = read_connection(connection).ok_or_else(|| PaginationError::UnexpectedBody {
            url: endpoint.to_string(),
            expected: "a connection with `nodes` or `edges`",
        })?;
        items.extend(page_items);

        if !has_next_page {
            break;
        }
        let cursor = end_cursor.ok_or_else(|| PaginationError::MissingCursor {
            path: path.to_string(),
        })?;
        variables.insert(query.cursor_variable.clone(), Value::String(cursor));
    }

    log::debug!("{path}: {} items from {page} pages", items.len());
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::http::ApiResponse;
    use crate::progress::NoProgress;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records request URLs and bodies
    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<VecDeque<Result<ApiResponse, TaskError>>>,
        requests: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl FakeTransport {
        fn with(responses: Vec<Result<ApiResponse, TaskError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            }
        }

        fn next(&self, url: &str, body: Option<&Value>) -> Result<ApiResponse, TaskError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), body.cloned()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra request")
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Transport for FakeTransport {
        async fn get(&self, url: &str) -> Result<ApiResponse, TaskError> {
            self.next(url, None)
        }

        async fn post_json(&self, url: &str, body: &Value) -> Result<ApiResponse, TaskError> {
            self.next(url, Some(body))
        }
    }

    fn page(body: Value, link: Option<&str>) -> Result<ApiResponse, TaskError> {
        Ok(ApiResponse {
            status: 200,
            link: link.map(String::from),
            body,
        })
    }

    #[test]
    fn next_link_found() {
        let header = r#"<https://x/api/v1/courses?page=2>; rel="next", <https://x/api/v1/courses?page=1>; rel="first""#;
        assert_eq!(
            next_link(header),
            Some("https://x/api/v1/courses?page=2".to_string())
        );
    }

    #[test]
    fn next_link_not_first_entry() {
        let header = r#"<https://x/c?page=1>; rel="current",<https://x/c?page=3>; rel="next",<https://x/c?page=9>; rel="last""#;
        assert_eq!(next_link(header), Some("https://x/c?page=3".to_string()));
    }

    #[test]
    fn next_link_absent() {
        let header = r#"<https://x/c?page=1>; rel="current", <https://x/c?page=1>; rel="first", <https://x/c?page=1>; rel="last""#;
        assert_eq!(next_link(header), None);
    }

    #[test]
    fn next_link_variants() {
        assert_eq!(next_link(r#"<https://x/n>; rel=next"#), Some("https://x/n".to_string()));
        assert_eq!(
            next_link(r#"<https://x/n>; type="json"; REL="last next""#),
            Some("https://x/n".to_string())
        );
    }

    #[test]
    fn next_link_malformed() {
        assert_eq!(next_link(""), None);
        assert_eq!(next_link("garbage"), None);
        assert_eq!(next_link(r#"https://x/n; rel="next""#), None);
        assert_eq!(next_link(r#"<>; rel="next""#), None);
        // "nextish" is not "next"
        assert_eq!(next_link(r#"<https://x/n>; rel="nextish""#), None);
    }

    #[test]
    fn next_link_comma_in_url() {
        let header = r#"<https://x/api/v1/courses/1/students/submissions?student_ids[]=1,2&page=2>; rel="next", <https://x/api/v1/courses/1/students/submissions?student_ids[]=1,2&page=1>; rel="first""#;
        let expected = "https://x/api/v1/courses/1/students/submissions?student_ids[]=1,2&page=2";
        assert_eq!(next_link(header), Some(expected.to_string()));
    }

    #[test]
    fn next_link_comma_in_quoted_param() {
        let header = r#"<https://x/c?page=1>; rel="first"; title="a, b", <https://x/c?page=2>; rel="next""#;
        assert_eq!(next_link(header), Some("https://x/c?page=2".to_string()));
    }

    #[tokio::test]
    async fn link_walker_follows_three_pages() {
        let fake = FakeTransport::with(vec![
            page(json!([1, 2]), Some(r#"<https://x/items?page=2>; rel="next""#)),
            page(json!([3, 4]), Some(r#"<https://x/items?page=3>; rel="next""#)),
            page(json!([5, 6]), Some(r#"<https://x/items?page=1>; rel="first""#)),
        ]);
        let items = fetch_all_linked(&fake, "https://x/items", &NoProgress)
            .await
            .unwrap();

        assert_eq!(items, (1..=6).map(|n| json!(n)).collect::<Vec<_>>());
        assert_eq!(fake.request_count(), 3);
        let urls: Vec<String> = fake
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://x/items",
                "https://x/items?page=2",
                "https://x/items?page=3"
            ]
        );
    }

    #[tokio::test]
    async fn link_walker_single_page_without_header() {
        let fake = FakeTransport::with(vec![page(json!([{"id": 1}]), None)]);
        let items = fetch_all_linked(&fake, "https://x/items", &NoProgress)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(fake.request_count(), 1);
    }

    #[tokio::test]
    async fn link_walker_keeps_comma_urls() {
        let next = "https://x/submissions?student_ids[]=1,2&page=2";
        let fake = FakeTransport::with(vec![
            page(json!([1]), Some(format!(r#"<{next}>; rel="next""#).as_str())),
            page(json!([2]), None),
        ]);
        let items = fetch_all_linked(&fake, "https://x/submissions", &NoProgress)
            .await
            .unwrap();
        assert_eq!(items, vec![json!(1), json!(2)]);
        assert_eq!(fake.requests.lock().unwrap()[1].0, next);
    }

    #[tokio::test]
    async fn link_walker_stops_on_cycle() {
        let fake = FakeTransport::with(vec![
            page(json!([1]), Some(r#"<https://x/items?page=2>; rel="next""#)),
            page(json!([2]), Some(r#"<https://x/items>; rel="next""#)),
        ]);
        let err = fetch_all_linked(&fake, "https://x/items", &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PaginationError::LinkCycle { ref url } if url == "https://x/items"));
        assert_eq!(fake.request_count(), 2);
    }

    #[tokio::test]
    async fn link_walker_rejects_non_array() {
        let fake = FakeTransport::with(vec![page(json!({"id": 1}), None)]);
        let err = fetch_all_linked(&fake, "https://x/items", &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PaginationError::UnexpectedBody { .. }));
    }

    #[tokio::test]
    async fn link_walker_surfaces_request_error() {
        let fake = FakeTransport::with(vec![
            page(json!([1]), Some(r#"<https://x/items?page=2>; rel="next""#)),
            Err(TaskError::http(401, "unauthorized")),
        ]);
        let err = fetch_all_linked(&fake, "https://x/items", &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaginationError::Request(TaskError::Http { status: 401, .. })
        ));
    }

    fn assignments_query() -> CursorQuery {
        CursorQuery::new(
            "query($courseId: ID!, $cursor: String) { ... }",
            "course.assignmentsConnection",
        )
        .variable("courseId", "101")
    }

    #[tokio::test]
    async fn cursor_walker_nodes_and_edges() {
        let fake = FakeTransport::with(vec![
            page(
                json!({"data": {"course": {"assignmentsConnection": {
                    "nodes": [{"_id": "1"}, {"_id": "2"}],
                    "pageInfo": {"hasNextPage": true, "endCursor": "MQ"}
                }}}}),
                None,
            ),
            page(
                json!({"data": {"course": {"assignmentsConnection": {
                    "edges": [{"node": {"_id": "3"}}],
                    "pageInfo": {"hasNextPage": false, "endCursor": "Mg"}
                }}}}),
                None,
            ),
        ]);
        let items = fetch_all_cursor(&fake, "https://x/api/graphql", &assignments_query(), &NoProgress)
            .await
            .unwrap();

        let ids: Vec<&str> = items.iter().filter_map(|n| n["_id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let requests = fake.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let first = requests[0].1.as_ref().unwrap();
        assert_eq!(first["variables"]["courseId"], json!("101"));
        assert!(first["variables"].get("cursor").is_none());
        let second = requests[1].1.as_ref().unwrap();
        assert_eq!(second["variables"]["cursor"], json!("MQ"));
        assert_eq!(second["variables"]["courseId"], json!("101"));
    }

    #[tokio::test]
    async fn cursor_walker_missing_connection_is_descriptive() {
        let fake = FakeTransport::with(vec![page(json!({"data": {"course": null}}), None)]);
        let err = fetch_all_cursor(&fake, "https://x/api/graphql", &assignments_query(), &NoProgress)
            .await
            .unwrap_err();
        match err {
            PaginationError::ConnectionNotFound { path } => {
                assert_eq!(path, "course.assignmentsConnection");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cursor_walker_graphql_errors() {
        let fake = FakeTransport::with(vec![page(
            json!({"data": null, "errors": [{"message": "not authorized"}]}),
            None,
        )]);
        let err = fetch_all_cursor(&fake, "https://x/api/graphql", &assignments_query(), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaginationError::Request(TaskError::Application { .. })
        ));
    }

    #[tokio::test]
    async fn cursor_walker_requires_end_cursor() {
        let fake = FakeTransport::with(vec![page(
            json!({"data": {"course": {"assignmentsConnection": {
                "nodes": [],
                "pageInfo": {"hasNextPage": true, "endCursor": null}
            }}}}),
            None,
        )]);
        let err = fetch_all_cursor(&fake, "https://x/api/graphql", &assignments_query(), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PaginationError::MissingCursor { .. }));
    }

    #[tokio::test]
    async fn cursor_walker_custom_cursor_variable() {
        let fake = FakeTransport::with(vec![
            page(
                json!({"data": {"conn": {"nodes": [1], "pageInfo": {"hasNextPage": true, "endCursor": "A"}}}}),
                None,
            ),
            page(
                json!({"data": {"conn": {"nodes": [2], "pageInfo": {"hasNextPage": false}}}}),
                None,
            ),
        ]);
        let query = CursorQuery::new("q", "conn").cursor_variable("after");
        let items = fetch_all_cursor(&fake, "https://x/api/graphql", &query, &NoProgress)
            .await
            .unwrap();
        assert_eq!(items, vec![json!(1), json!(2)]);
        let requests = fake.requests.lock().unwrap();
        assert_eq!(requests[1].1.as_ref().unwrap()["variables"]["after"], json!("A"));
    }

    #[test]
    fn resolve_path_nested() {
        let body = json!({"a": {"b": {"c": 1}}, "n": null});
        assert_eq!(resolve_path(&body, "a.b.c"), Some(&json!(1)));
        assert_eq!(resolve_path(&body, "a.x"), None);
        assert_eq!(resolve_path(&body, "n"), None);
    }
}
