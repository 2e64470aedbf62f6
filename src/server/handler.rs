use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{header, request::Parts, Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::common::data::{Mock, RecordedRequest, RecordedResponse, Recording, Scope};
use crate::common::http::HttpClient;
use crate::server::session::{resolve_session, Mode};
use crate::server::state::Registry;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("cannot serialize JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("cannot reach upstream: {0}")]
    UpstreamError(#[from] crate::common::http::Error),
    #[error("cannot build response: {0}")]
    HttpError(#[from] http::Error),
    #[error("invalid upstream target: {0}")]
    UpstreamTargetError(#[from] http::uri::InvalidUri),
}

/// The operations a request can be dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    RecordResponse,
    GetMocks,
    UpdateMock,
    ResetMocksToDefaults,
    SetMocksToPassThroughs,
    GetVariables,
    AddOrUpdateVariable,
    DeleteVariable,
    Serve,
}

enum PathRule {
    Exact(&'static str),
    Prefix(&'static str),
}

/// Ordered route table, first match wins. Anything that matches no rule falls
/// back to [`Operation::Serve`], so every request is handled.
static ROUTES: &[(Method, PathRule, Operation)] = &[
    (
        Method::PUT,
        PathRule::Exact("/ngapimock/mocks/record"),
        Operation::RecordResponse,
    ),
    (
        Method::GET,
        PathRule::Exact("/ngapimock/mocks"),
        Operation::GetMocks,
    ),
    (
        Method::PUT,
        PathRule::Exact("/ngapimock/mocks"),
        Operation::UpdateMock,
    ),
    (
        Method::PUT,
        PathRule::Exact("/ngapimock/mocks/defaults"),
        Operation::ResetMocksToDefaults,
    ),
    (
        Method::PUT,
        PathRule::Exact("/ngapimock/mocks/passthroughs"),
        Operation::SetMocksToPassThroughs,
    ),
    (
        Method::GET,
        PathRule::Exact("/ngapimock/variables"),
        Operation::GetVariables,
    ),
    (
        Method::PUT,
        PathRule::Exact("/ngapimock/variables"),
        Operation::AddOrUpdateVariable,
    ),
    (
        Method::DELETE,
        PathRule::Prefix("/ngapimock/variables/"),
        Operation::DeleteVariable,
    ),
];

pub(crate) fn resolve_operation(method: &Method, path: &str) -> Operation {
    for (route_method, rule, operation) in ROUTES {
        let path_matches = match rule {
            PathRule::Exact(exact) => path == *exact,
            PathRule::Prefix(prefix) => path.starts_with(prefix),
        };
        if path_matches && method == route_method {
            return *operation;
        }
    }
    Operation::Serve
}

/// Scoped view over the registry's per-mock state.
///
/// The session-scoped implementation partitions strictly by the supplied
/// token and never touches other tokens or the shared partition; the shared
/// implementation always uses the shared partition, regardless of any token.
/// Operation handlers are written once against this trait and monomorphized
/// per mode at the dispatcher boundary.
pub trait ScopedState {
    fn scope(session: Option<&str>) -> Scope;

    /// Effective selection per mock identifier: scoped override where
    /// present, otherwise the scope-independent default.
    fn selections(registry: &Registry, session: Option<&str>) -> BTreeMap<String, String> {
        let mut selections = registry.defaults();
        for (identifier, scenario) in registry.selections_partition(&Self::scope(session)) {
            selections.insert(identifier, scenario);
        }
        selections
    }

    fn delays(registry: &Registry, session: Option<&str>) -> BTreeMap<String, u64> {
        registry.delays_partition(&Self::scope(session))
    }

    fn echos(registry: &Registry, session: Option<&str>) -> BTreeMap<String, bool> {
        registry.echos_partition(&Self::scope(session))
    }
}

pub struct SessionScoped;

impl ScopedState for SessionScoped {
    fn scope(session: Option<&str>) -> Scope {
        // A missing token is unreachable in protractor mode; an empty-token
        // partition keeps the isolation guarantee intact regardless.
        Scope::Session(session.unwrap_or_default().to_string())
    }
}

pub struct SharedScoped;

impl ScopedState for SharedScoped {
    fn scope(_session: Option<&str>) -> Scope {
        Scope::Shared
    }
}

/// Read model served by `GET /ngapimock/mocks`. Exactly these keys, nothing
/// else.
#[derive(Serialize)]
struct ReadModel {
    mocks: Vec<Mock>,
    selections: BTreeMap<String, String>,
    delays: BTreeMap<String, u64>,
    echos: BTreeMap<String, bool>,
    recordings: Vec<Recording>,
    record: bool,
}

#[derive(Deserialize)]
struct UpdateMockRequest {
    identifier: String,
    #[serde(default)]
    scenario: Option<String>,
    #[serde(default)]
    delay: Option<u64>,
    #[serde(default)]
    echo: Option<bool>,
}

#[derive(Deserialize)]
struct RecordRequest {
    record: bool,
}

#[derive(Deserialize)]
struct VariableRequest {
    key: String,
    value: String,
}

/// Maps every inbound request to one operation handler. Holds no per-request
/// state; the registry is the only state that outlives a request.
pub struct Dispatcher {
    registry: Arc<Registry>,
    upstream: Option<String>,
    client: Arc<dyn HttpClient + Send + Sync>,
    print_access_log: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        upstream: Option<String>,
        client: Arc<dyn HttpClient + Send + Sync>,
        print_access_log: bool,
    ) -> Self {
        Self {
            registry,
            upstream,
            client,
            print_access_log,
        }
    }

    /// Entry point for every request. Never panics and always produces
    /// exactly one response; handler errors surface as a 500 with a JSON
    /// message instead of aborting the response cycle.
    pub async fn dispatch(&self, parts: Parts, body: Bytes) -> Response<Full<Bytes>> {
        let session = resolve_session(&parts.headers);
        let mode = Mode::from_session(session.as_deref());
        let operation = resolve_operation(&parts.method, parts.uri.path());

        if self.print_access_log {
            tracing::info!(
                method = %parts.method,
                uri = %parts.uri,
                ?mode,
                session = session.as_deref().unwrap_or("-"),
                "request"
            );
        }

        let result = match mode {
            Mode::Protractor => {
                self.handle::<SessionScoped>(operation, &parts, &body, session.as_deref())
                    .await
            }
            Mode::Runtime => {
                self.handle::<SharedScoped>(operation, &parts, &body, session.as_deref())
                    .await
            }
        };

        result.unwrap_or_else(|err| {
            tracing::error!("request handler error: {err}");
            message_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        })
    }

    async fn handle<S: ScopedState>(
        &self,
        operation: Operation,
        parts: &Parts,
        body: &Bytes,
        session: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, HandlerError> {
        match operation {
            Operation::RecordResponse => Ok(self.record_response(body)),
            Operation::GetMocks => Ok(self.get_mocks::<S>(session)),
            Operation::UpdateMock => Ok(self.update_mock::<S>(body, session)),
            Operation::ResetMocksToDefaults => Ok(self.reset_mocks_to_defaults::<S>(session)),
            Operation::SetMocksToPassThroughs => {
                Ok(self.set_mocks_to_pass_throughs::<S>(session))
            }
            Operation::GetVariables => Ok(self.get_variables::<S>(session)),
            Operation::AddOrUpdateVariable => Ok(self.add_or_update_variable::<S>(body, session)),
            Operation::DeleteVariable => Ok(self.delete_variable::<S>(parts, session)),
            Operation::Serve => self.serve::<S>(parts, body, session).await,
        }
    }

    fn get_mocks<S: ScopedState>(&self, session: Option<&str>) -> Response<Full<Bytes>> {
        let read_model = ReadModel {
            mocks: self.registry.mocks(),
            selections: S::selections(&self.registry, session),
            delays: S::delays(&self.registry, session),
            echos: S::echos(&self.registry, session),
            recordings: self.registry.recordings(),
            record: self.registry.record(),
        };
        json_response(StatusCode::OK, &read_model)
    }

    fn update_mock<S: ScopedState>(
        &self,
        body: &Bytes,
        session: Option<&str>,
    ) -> Response<Full<Bytes>> {
        let update: UpdateMockRequest = match serde_json::from_slice(body) {
            Ok(update) => update,
            Err(err) => {
                return message_response(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid update payload: {err}"),
                )
            }
        };

        let scope = S::scope(session);
        let Some(mock) = self.registry.find_mock(&update.identifier) else {
            return message_response(
                StatusCode::CONFLICT,
                &format!("no mock found with identifier {}", update.identifier),
            );
        };

        if let Some(scenario) = update.scenario {
            if !mock.responses.contains_key(&scenario) {
                return message_response(
                    StatusCode::CONFLICT,
                    &format!("no scenario {scenario} found for mock {}", mock.identifier),
                );
            }
            self.registry
                .set_selection(&scope, &mock.identifier, scenario);
            // Selecting a scenario takes the mock out of passthrough.
            self.registry.set_passthrough(&scope, &mock.identifier, false);
        }
        if let Some(delay) = update.delay {
            self.registry.set_delay(&scope, &mock.identifier, delay);
        }
        if let Some(echo) = update.echo {
            self.registry.set_echo(&scope, &mock.identifier, echo);
        }

        json_response(StatusCode::OK, &json!({}))
    }

    fn reset_mocks_to_defaults<S: ScopedState>(
        &self,
        session: Option<&str>,
    ) -> Response<Full<Bytes>> {
        let scope = S::scope(session);
        self.registry
            .replace_selections(&scope, self.registry.defaults());
        self.registry.clear_delays(&scope);
        self.registry.clear_echos(&scope);
        self.registry.clear_passthroughs(&scope);
        json_response(StatusCode::OK, &json!({}))
    }

    fn set_mocks_to_pass_throughs<S: ScopedState>(
        &self,
        session: Option<&str>,
    ) -> Response<Full<Bytes>> {
        self.registry.set_all_passthrough(&S::scope(session));
        json_response(StatusCode::OK, &json!({}))
    }

    fn record_response(&self, body: &Bytes) -> Response<Full<Bytes>> {
        match serde_json::from_slice::<RecordRequest>(body) {
            Ok(request) => {
                self.registry.set_record(request.record);
                json_response(StatusCode::OK, &json!({}))
            }
            Err(err) => message_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid record payload: {err}"),
            ),
        }
    }

    fn get_variables<S: ScopedState>(&self, session: Option<&str>) -> Response<Full<Bytes>> {
        json_response(
            StatusCode::OK,
            &self.registry.variables(&S::scope(session)),
        )
    }

    fn add_or_update_variable<S: ScopedState>(
        &self,
        body: &Bytes,
        session: Option<&str>,
    ) -> Response<Full<Bytes>> {
        match serde_json::from_slice::<VariableRequest>(body) {
            Ok(variable) => {
                self.registry
                    .set_variable(&S::scope(session), variable.key, variable.value);
                json_response(StatusCode::OK, &json!({}))
            }
            Err(err) => message_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid variable payload: {err}"),
            ),
        }
    }

    fn delete_variable<S: ScopedState>(
        &self,
        parts: &Parts,
        session: Option<&str>,
    ) -> Response<Full<Bytes>> {
        let key = parts
            .uri
            .path()
            .strip_prefix("/ngapimock/variables/")
            .unwrap_or_default();
        self.registry.delete_variable(&S::scope(session), key);
        json_response(StatusCode::OK, &json!({}))
    }

    /// Fallback for every request that targets no management route: serve the
    /// selected scenario of the first matching mock, or forward to the
    /// upstream for passthrough and unmatched requests.
    async fn serve<S: ScopedState>(
        &self,
        parts: &Parts,
        body: &Bytes,
        session: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, HandlerError> {
        let scope = S::scope(session);
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let matched = self
            .registry
            .mocks()
            .into_iter()
            .find(|mock| mock_matches(mock, &parts.method, &url));

        let Some(mock) = matched else {
            return self.forward(parts, body, None).await;
        };

        if self.registry.is_passthrough(&scope, &mock.identifier) {
            return self.forward(parts, body, Some(&mock.identifier)).await;
        }

        let scenario = self.registry.selection(&scope, &mock.identifier);
        let response = scenario
            .as_deref()
            .and_then(|scenario| mock.responses.get(scenario));
        let Some(response) = response else {
            return self.forward(parts, body, Some(&mock.identifier)).await;
        };

        let delay = self
            .registry
            .delay(&scope, &mock.identifier)
            .or(response.delay)
            .unwrap_or(0);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let echo = self
            .registry
            .echo(&scope, &mock.identifier)
            .unwrap_or(response.echo);
        if echo {
            tracing::info!(
                method = %parts.method,
                url = %url,
                payload = %String::from_utf8_lossy(body),
                "echo"
            );
        }

        let status =
            StatusCode::from_u16(response.status.unwrap_or(200)).unwrap_or(StatusCode::OK);
        let mut builder = Response::builder().status(status);
        if let Some(headers) = &response.headers {
            for (name, value) in headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        } else if response.data.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }

        let payload = match &response.data {
            Some(data) => serde_json::to_vec(data)?,
            None => Vec::new(),
        };

        if self.registry.record() {
            self.registry.add_recording(Recording {
                identifier: Some(mock.identifier.clone()),
                request: recorded_request(parts, &url, body),
                response: RecordedResponse {
                    status: status.as_u16(),
                    body: (!payload.is_empty())
                        .then(|| String::from_utf8_lossy(&payload).into_owned()),
                },
                datetime: unix_millis(),
            });
        }

        Ok(builder.body(Full::new(Bytes::from(payload)))?)
    }

    /// Forwards a request to the configured upstream, the standalone
    /// equivalent of handing the request to the next middleware. Without an
    /// upstream the request is answered with a 404.
    async fn forward(
        &self,
        parts: &Parts,
        body: &Bytes,
        identifier: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, HandlerError> {
        let Some(upstream) = &self.upstream else {
            return Ok(message_response(
                StatusCode::NOT_FOUND,
                &format!("no mock or upstream for {} {}", parts.method, parts.uri.path()),
            ));
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target: Uri = format!("{upstream}{path_and_query}").parse()?;

        let mut request = Request::builder()
            .method(parts.method.clone())
            .uri(target)
            .body(body.clone())?;
        *request.headers_mut() = parts.headers.clone();

        let response = self.client.send(request).await?;
        let (res_parts, res_body) = response.into_parts();

        if self.registry.record() {
            self.registry.add_recording(Recording {
                identifier: identifier.map(str::to_string),
                request: recorded_request(parts, path_and_query, body),
                response: RecordedResponse {
                    status: res_parts.status.as_u16(),
                    body: (!res_body.is_empty())
                        .then(|| String::from_utf8_lossy(&res_body).into_owned()),
                },
                datetime: unix_millis(),
            });
        }

        Ok(Response::from_parts(res_parts, Full::new(res_body)))
    }
}

fn mock_matches(mock: &Mock, method: &Method, url: &str) -> bool {
    if !mock.method.eq_ignore_ascii_case(method.as_str()) {
        return false;
    }
    match Regex::new(&mock.expression) {
        Ok(expression) => expression.is_match(url),
        // Invalid patterns degrade to a literal comparison.
        Err(_) => mock.expression == url,
    }
}

fn recorded_request(parts: &Parts, url: &str, body: &Bytes) -> RecordedRequest {
    RecordedRequest {
        method: parts.method.to_string(),
        url: url.to_string(),
        payload: (!body.is_empty()).then(|| String::from_utf8_lossy(body).into_owned()),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("Cannot build JSON response")
}

fn message_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "message": message }))
}
