use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A registered URL/method pattern together with its named response scenarios.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Mock {
    /// Derived at registration time: the `name` if one was provided, otherwise
    /// `expression + "$$" + method`.
    #[serde(default)]
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Regex source matched (unanchored) against the request path and query.
    pub expression: String,
    pub method: String,
    #[serde(default)]
    pub responses: BTreeMap<String, MockResponse>,
}

impl Mock {
    pub fn derived_identifier(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}$${}", self.expression, self.method),
        }
    }

    /// Key of the first scenario flagged `default`, if any.
    pub fn default_scenario(&self) -> Option<&str> {
        self.responses
            .iter()
            .find(|(_, response)| response.default)
            .map(|(key, _)| key.as_str())
    }
}

/// One named scenario variant of a [`Mock`].
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MockResponse {
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Response delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default)]
    pub echo: bool,
}

/// State partition key. Every per-mock override lives either in the shared
/// (runtime) partition or in the partition of one opaque session token.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Shared,
    Session(String),
}

impl Scope {
    pub fn from_session(session: Option<&str>) -> Self {
        match session {
            Some(token) => Scope::Session(token.to_string()),
            None => Scope::Shared,
        }
    }
}

/// A captured exchange, appended while the record flag is enabled.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Recording {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub request: RecordedRequest,
    pub response: RecordedResponse,
    /// Unix timestamp in milliseconds.
    pub datetime: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RecordedResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}
