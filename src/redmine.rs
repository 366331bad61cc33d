use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::logging;
use crate::metrics::Metrics;
use crate::models::{
    CustomField, Issue, IssuePriority, IssueStatus, Project, Query, Tracker, User,
};
use crate::sort::IssueFilter;

const API_KEY_HEADER: &str = "X-Redmine-API-Key";
const SESSION_COOKIE: &str = "_redmine_session";
const PROJECT_PAGE_SIZE: usize = 100;
const DECODE_BODY_LIMIT: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum RedmineError {
    #[error("redmine request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("redmine returned HTTP {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode redmine response: {source}; body: {body}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid redmine base url '{0}'")]
    InvalidBaseUrl(String),
    #[error("not logged in: no redmine server configured")]
    NotLoggedIn,
}

impl RedmineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status, .. } if *status == reqwest::StatusCode::NOT_FOUND)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Http { status, .. }
                if *status == reqwest::StatusCode::UNAUTHORIZED
                    || *status == reqwest::StatusCode::FORBIDDEN
        )
    }
}

/// How requests authenticate. The API key wins over basic auth, which wins
/// over a session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub cookie: Option<String>,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn has_any(&self) -> bool {
        self.api_key_value().is_some()
            || self.cookie_value().is_some()
            || self.basic_pair().is_some()
    }

    fn api_key_value(&self) -> Option<&str> {
        non_blank(&self.api_key)
    }

    fn cookie_value(&self) -> Option<&str> {
        non_blank(&self.cookie)
    }

    /// Username and password, only when both are present.
    fn basic_pair(&self) -> Option<(&str, &str)> {
        Some((non_blank(&self.username)?, self.password.as_deref()?))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Parameters for one page of `/issues.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueListParams {
    pub project_id: Option<i64>,
    pub query_id: Option<i64>,
    pub sort: Option<String>,
    pub offset: usize,
    pub limit: usize,
    pub filter: Option<IssueFilter>,
}

impl IssueListParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("offset", self.offset.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(project) = self.project_id {
            query.push(("project_id", project.to_string()));
        }
        if let Some(query_id) = self.query_id {
            query.push(("query_id", query_id.to_string()));
        }
        if let Some(sort) = &self.sort {
            query.push(("sort", sort.clone()));
        }
        if let Some(filter) = &self.filter {
            query.extend(filter.query_params());
        }
        query
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuePage {
    pub issues: Vec<Issue>,
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
}

impl IssuePage {
    pub fn has_more(&self) -> bool {
        self.offset + self.issues.len() < self.total_count
    }
}

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session_cookie: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RedmineClient {
    pub base_url: String,
    credentials: Credentials,
    http: Client,
    max_retries: usize,
    metrics: Arc<Metrics>,
}

impl RedmineClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, RedmineError> {
        Self::new_with_metrics(base_url, credentials, Arc::new(Metrics::new()))
    }

    pub fn new_with_metrics(
        base_url: &str,
        credentials: Credentials,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RedmineError> {
        let http = Client::builder().build()?;
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            credentials,
            http,
            max_retries: 3,
            metrics,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let creds = &self.credentials;
        if let Some(key) = creds.api_key_value() {
            return request.header(API_KEY_HEADER, key);
        }
        if let Some((username, password)) = creds.basic_pair() {
            return request.basic_auth(username, Some(password));
        }
        if let Some(cookie) = creds.cookie_value() {
            return request.header(COOKIE, cookie);
        }
        request
    }

    fn request_with_retry<F>(&self, mut send: F) -> Result<Response, RedmineError>
    where
        F: FnMut() -> Result<Response, reqwest::Error>,
    {
        for attempt in 0..=self.max_retries {
            self.metrics.inc_api_request();
            let response = match send() {
                Ok(resp) => resp,
                Err(err) => {
                    logging::warn(format!(
                        "redmine request transport error on attempt {}: {}",
                        attempt + 1,
                        err
                    ));
                    return Err(RedmineError::Request(err));
                }
            };

            if !is_retryable(response.status()) || attempt == self.max_retries {
                if !response.status().is_success() {
                    logging::warn(format!(
                        "redmine request completed with status {} after {} attempt(s)",
                        response.status(),
                        attempt + 1
                    ));
                }
                return Ok(response);
            }

            let wait = retry_after_or_backoff(&response, attempt);
            logging::debug(format!(
                "redmine retryable status {} attempt {} waiting {:?}",
                response.status(),
                attempt + 1,
                wait
            ));
            self.metrics.inc_retry();
            thread::sleep(wait);
        }

        unreachable!("retry loop should always return");
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, RedmineError> {
        let url = self.url(path);
        let response =
            self.request_with_retry(|| self.authorize(self.http.get(&url)).query(query).send())?;
        ensure_success(response)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RedmineError> {
        let response = self.get(path, query)?;
        decode(response, path)
    }

    pub fn current_user(&self) -> Result<CurrentUser, RedmineError> {
        let response = self.get("users/current.json", &[])?;
        let session_cookie = session_cookie(&response);
        let payload: UserEnvelope = decode(response, "users/current.json")?;
        logging::debug(format!(
            "redmine current user login={} session_cookie_present={}",
            payload.user.login,
            session_cookie.is_some()
        ));
        Ok(CurrentUser {
            user: payload.user,
            session_cookie,
        })
    }

    pub fn user(&self, id: i64) -> Result<User, RedmineError> {
        let payload: UserEnvelope = self.get_json(&format!("users/{id}.json"), &[])?;
        Ok(payload.user)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, RedmineError> {
        let mut offset = 0;
        let mut all = Vec::new();

        loop {
            let payload: ProjectsEnvelope = self.get_json(
                "projects.json",
                &[
                    ("offset", offset.to_string()),
                    ("limit", PROJECT_PAGE_SIZE.to_string()),
                ],
            )?;
            let page_count = payload.projects.len();
            logging::debug(format!(
                "redmine projects page offset={} count={} total={:?}",
                offset, page_count, payload.total_count
            ));
            all.extend(payload.projects);

            offset += page_count;
            match payload.total_count {
                Some(total) if offset < total && page_count > 0 => continue,
                _ => break,
            }
        }

        Ok(all)
    }

    pub fn list_issues(&self, params: &IssueListParams) -> Result<IssuePage, RedmineError> {
        let payload: IssuesEnvelope = self.get_json("issues.json", &params.query_pairs())?;
        let total_count = payload
            .total_count
            .unwrap_or(params.offset + payload.issues.len());
        logging::debug(format!(
            "redmine issues project={:?} query={:?} offset={} count={} total={}",
            params.project_id,
            params.query_id,
            params.offset,
            payload.issues.len(),
            total_count
        ));
        Ok(IssuePage {
            issues: payload.issues,
            total_count,
            offset: payload.offset.unwrap_or(params.offset),
            limit: payload.limit.unwrap_or(params.limit),
        })
    }

    pub fn issue(&self, id: i64) -> Result<Issue, RedmineError> {
        let payload: IssueEnvelope = self.get_json(
            &format!("issues/{id}.json"),
            &[("include", "attachments".to_string())],
        )?;
        Ok(payload.issue)
    }

    pub fn delete_issue(&self, id: i64) -> Result<(), RedmineError> {
        let url = self.url(&format!("issues/{id}.json"));
        let response = self.request_with_retry(|| self.authorize(self.http.delete(&url)).send())?;
        ensure_success(response)?;
        logging::info(format!("deleted redmine issue #{id}"));
        Ok(())
    }

    pub fn list_trackers(&self) -> Result<Vec<Tracker>, RedmineError> {
        let payload: TrackersEnvelope = self.get_json("trackers.json", &[])?;
        Ok(payload.trackers)
    }

    pub fn list_issue_statuses(&self) -> Result<Vec<IssueStatus>, RedmineError> {
        let payload: StatusesEnvelope = self.get_json("issue_statuses.json", &[])?;
        Ok(payload.issue_statuses)
    }

    pub fn list_issue_priorities(&self) -> Result<Vec<IssuePriority>, RedmineError> {
        let payload: PrioritiesEnvelope =
            self.get_json("enumerations/issue_priorities.json", &[])?;
        Ok(payload.issue_priorities)
    }

    pub fn list_queries(&self) -> Result<Vec<Query>, RedmineError> {
        let payload: QueriesEnvelope = self.get_json("queries.json", &[])?;
        Ok(payload.queries)
    }

    pub fn list_custom_fields(&self) -> Result<Vec<CustomField>, RedmineError> {
        let payload: CustomFieldsEnvelope = self.get_json("custom_fields.json", &[])?;
        Ok(payload.custom_fields)
    }

    /// Raw bytes behind an attachment `content_url`, absolute or server-relative.
    pub fn download(&self, content_url: &str) -> Result<Vec<u8>, RedmineError> {
        let url = if content_url.starts_with("http://") || content_url.starts_with("https://") {
            content_url.to_string()
        } else {
            self.url(content_url)
        };
        let response = self.request_with_retry(|| self.authorize(self.http.get(&url)).send())?;
        let response = ensure_success(response)?;
        Ok(response.bytes()?.to_vec())
    }
}

fn ensure_success(response: Response) -> Result<Response, RedmineError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(RedmineError::Http { status, body })
}

fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, RedmineError> {
    let body = response.text()?;
    serde_json::from_str(&body).map_err(|source| {
        let short_body = truncate(&body, DECODE_BODY_LIMIT);
        logging::warn(format!(
            "failed decoding redmine response for {}: {}",
            what, short_body
        ));
        RedmineError::Decode {
            source,
            body: short_body,
        }
    })
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

fn session_cookie(response: &Response) -> Option<String> {
    let pairs: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(|pair| pair.trim().to_string())
        .filter(|pair| pair.contains('='))
        .collect();

    pairs
        .iter()
        .find(|pair| pair.starts_with(SESSION_COOKIE))
        .or_else(|| pairs.first())
        .cloned()
}

pub fn normalize_base_url(raw: &str) -> Result<String, RedmineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RedmineError::InvalidBaseUrl(raw.to_string()));
    }

    let mut candidate = trimmed.to_string();

    if candidate.starts_with("https//") {
        candidate = format!("https://{}", candidate.trim_start_matches("https//"));
    } else if candidate.starts_with("http//") {
        candidate = format!("http://{}", candidate.trim_start_matches("http//"));
    } else if !candidate.starts_with("https://") && !candidate.starts_with("http://") {
        candidate = format!("https://{candidate}");
    }

    let parsed = reqwest::Url::parse(&candidate)
        .map_err(|_| RedmineError::InvalidBaseUrl(raw.to_string()))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after_or_backoff(response: &Response, attempt: usize) -> Duration {
    if let Some(header) = response.headers().get("Retry-After") {
        if let Ok(value) = header.to_str() {
            if let Ok(seconds) = value.parse::<u64>() {
                return Duration::from_secs(seconds.min(30));
            }
        }
    }

    let seconds = 1_u64 << attempt.min(4);
    Duration::from_secs(seconds)
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Debug, Deserialize)]
struct ProjectsEnvelope {
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct IssuesEnvelope {
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    total_count: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct IssueEnvelope {
    issue: Issue,
}

#[derive(Debug, Deserialize)]
struct TrackersEnvelope {
    #[serde(default)]
    trackers: Vec<Tracker>,
}

#[derive(Debug, Deserialize)]
struct StatusesEnvelope {
    #[serde(default)]
    issue_statuses: Vec<IssueStatus>,
}

#[derive(Debug, Deserialize)]
struct PrioritiesEnvelope {
    #[serde(default)]
    issue_priorities: Vec<IssuePriority>,
}

#[derive(Debug, Deserialize)]
struct QueriesEnvelope {
    #[serde(default)]
    queries: Vec<Query>,
}

#[derive(Debug, Deserialize)]
struct CustomFieldsEnvelope {
    #[serde(default)]
    custom_fields: Vec<CustomField>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::StatusFilter;
    use httpmock::Method::{DELETE, GET};
    use httpmock::MockServer;
    use serde_json::json;

    fn issue_json(id: i64) -> serde_json::Value {
        json!({
            "id": id,
            "project": {"id": 1, "name": "Facets"},
            "tracker": {"id": 1, "name": "Bug"},
            "status": {"id": 1, "name": "New"},
            "priority": {"id": 2, "name": "Normal"},
            "author": {"id": 5, "name": "Ada"},
            "subject": format!("Issue {id}")
        })
    }

    #[test]
    fn paginates_project_listing() {
        let server = MockServer::start();

        let page_1 = server.mock(|when, then| {
            when.method(GET)
                .path("/projects.json")
                .query_param("offset", "0")
                .query_param("limit", "100");
            then.status(200).json_body(json!({
                "projects": [{"id": 1, "identifier": "facets", "name": "Facets"}],
                "total_count": 2,
                "offset": 0,
                "limit": 100
            }));
        });

        let page_2 = server.mock(|when, then| {
            when.method(GET)
                .path("/projects.json")
                .query_param("offset", "1")
                .query_param("limit", "100");
            then.status(200).json_body(json!({
                "projects": [{"id": 2, "identifier": "docs", "name": "Docs"}],
                "total_count": 2,
                "offset": 1,
                "limit": 100
            }));
        });

        let client =
            RedmineClient::new(&server.base_url(), Credentials::api_key("k")).expect("client");
        let projects = client.list_projects().expect("list should succeed");

        page_1.assert();
        page_2.assert();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].identifier, "facets");
        assert_eq!(projects[1].name, "Docs");
    }

    #[test]
    fn lists_issues_with_sort_filter_and_api_key() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/issues.json")
                .header("X-Redmine-API-Key", "secret")
                .query_param("project_id", "1")
                .query_param("sort", "due_date:desc")
                .query_param("offset", "0")
                .query_param("limit", "25")
                .query_param("status_id", "closed");
            then.status(200).json_body(json!({
                "issues": [issue_json(10), issue_json(11)],
                "total_count": 30,
                "offset": 0,
                "limit": 25
            }));
        });

        let client =
            RedmineClient::new(&server.base_url(), Credentials::api_key("secret")).expect("client");
        let page = client
            .list_issues(&IssueListParams {
                project_id: Some(1),
                sort: Some("due_date:desc".into()),
                limit: 25,
                filter: Some(IssueFilter {
                    status: StatusFilter::Closed,
                    ..IssueFilter::default()
                }),
                ..IssueListParams::default()
            })
            .expect("list issues");

        mock.assert();
        assert_eq!(page.issues.len(), 2);
        assert_eq!(page.issues[0].id, 10);
        assert_eq!(page.total_count, 30);
        assert!(page.has_more());
    }

    #[test]
    fn deletes_issue() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(DELETE).path("/issues/42.json");
            then.status(204);
        });

        let client = RedmineClient::new(&server.base_url(), Credentials::basic("u", "p"))
            .expect("client");
        client.delete_issue(42).expect("delete succeeds");
        mock.assert();
    }

    #[test]
    fn surfaces_http_errors_with_status() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(DELETE).path("/issues/7.json");
            then.status(404).body("not found");
        });

        let client = RedmineClient::new(&server.base_url(), Credentials::default()).expect("client");
        let err = client.delete_issue(7).expect_err("404 should fail");
        assert!(err.is_not_found());
    }

    #[test]
    fn reports_decode_failures() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/trackers.json");
            then.status(200).body("<html>login</html>");
        });

        let client = RedmineClient::new(&server.base_url(), Credentials::default()).expect("client");
        let err = client.list_trackers().expect_err("html is not json");
        assert!(matches!(err, RedmineError::Decode { .. }));
    }

    #[test]
    fn captures_session_cookie_on_current_user() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/users/current.json");
            then.status(200)
                .header("Set-Cookie", "_redmine_session=abc123; path=/; HttpOnly")
                .json_body(json!({"user": {"id": 1, "login": "admin", "firstname": "Redmine", "lastname": "Admin"}}));
        });

        let client = RedmineClient::new(&server.base_url(), Credentials::basic("admin", "pw"))
            .expect("client");
        let current = client.current_user().expect("current user");
        assert_eq!(current.user.login, "admin");
        assert_eq!(current.user.name, "Redmine Admin");
        assert_eq!(
            current.session_cookie.as_deref(),
            Some("_redmine_session=abc123")
        );
    }

    #[test]
    fn fetches_user_by_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/users/5.json")
                .header("X-Redmine-API-Key", "secret");
            then.status(200).json_body(json!({"user": {
                "id": 5,
                "login": "ada",
                "firstname": "Ada",
                "lastname": "Lovelace",
                "mail": "ada@example.org"
            }}));
        });

        let client = RedmineClient::new(&server.base_url(), Credentials::api_key("secret"))
            .expect("client");
        let user = client.user(5).expect("user");
        mock.assert();
        assert_eq!(user.index, 5);
        assert_eq!(user.login, "ada");
        assert_eq!(user.name, "Ada Lovelace");
    }

    #[test]
    fn username_without_password_falls_back_to_cookie() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/users/current.json")
                .header("Cookie", "_redmine_session=x")
                .header_missing("Authorization");
            then.status(200)
                .json_body(json!({"user": {"id": 1, "login": "admin"}}));
        });

        let credentials = Credentials {
            username: Some("admin".into()),
            cookie: Some("_redmine_session=x".into()),
            ..Credentials::default()
        };
        assert!(credentials.has_any());
        let client = RedmineClient::new(&server.base_url(), credentials).expect("client");
        client.current_user().expect("current user");
        mock.assert();
    }

    #[test]
    fn retries_on_429_then_succeeds() {
        use tiny_http::{Header, Response, Server, StatusCode};

        let server = Server::http("127.0.0.1:0").expect("server start");
        let addr = format!("http://{}", server.server_addr());
        std::thread::spawn(move || {
            let mut requests = server.incoming_requests();

            if let Some(req) = requests.next() {
                let response = Response::empty(StatusCode(429))
                    .with_header(Header::from_bytes("Retry-After", "0").expect("header"));
                let _ = req.respond(response);
            }

            if let Some(req) = requests.next() {
                let body = json!({"issue": issue_json(1)}).to_string();
                let response = Response::from_string(body)
                    .with_status_code(StatusCode(200))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    );
                let _ = req.respond(response);
            }
        });

        let metrics = Arc::new(Metrics::new());
        let client =
            RedmineClient::new_with_metrics(&addr, Credentials::default(), Arc::clone(&metrics))
                .expect("client");
        let issue = client.issue(1).expect("eventually succeeds");
        assert_eq!(issue.id, 1);
        assert_eq!(metrics.snapshot().retries, 1);
        assert_eq!(metrics.snapshot().api_requests, 2);
    }

    #[test]
    fn normalizes_common_base_url_typos() {
        let a = normalize_base_url("https//redmine.example.org").expect("normalize");
        assert_eq!(a, "https://redmine.example.org");

        let b = normalize_base_url("redmine.example.org/").expect("normalize");
        assert_eq!(b, "https://redmine.example.org");

        let c = normalize_base_url("http://localhost:3000/redmine/").expect("normalize");
        assert_eq!(c, "http://localhost:3000/redmine");

        assert!(matches!(
            normalize_base_url("   "),
            Err(RedmineError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn credentials_presence() {
        assert!(!Credentials::default().has_any());
        assert!(Credentials::api_key("k").has_any());
        assert!(Credentials::basic("u", "p").has_any());
        assert!(Credentials {
            cookie: Some("_redmine_session=x".into()),
            ..Credentials::default()
        }
        .has_any());
        assert!(!Credentials {
            username: Some("u".into()),
            ..Credentials::default()
        }
        .has_any());
    }
}
