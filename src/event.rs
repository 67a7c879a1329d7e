//! Event data model
//!
//! These structures are what the collector receives. Field names follow the
//! collector's wire protocol and must not be renamed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::auth::CLIENT_NAME;

/// Severity of a captured event
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Fatal,
    #[default]
    Error,
    Warning,
    Info,
    Debug,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Fatal => "fatal",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// A single captured error or message plus its context
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Event {
    /// 32 hex digits, returned to the caller once the collector accepts it
    pub event_id: String,

    /// UTC, `YYYY-MM-DDTHH:MM:SS`
    pub timestamp: String,

    pub level: Level,

    pub logger: String,

    pub platform: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,

    #[serde(default)]
    pub tags: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestContext>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserContext>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    pub sdk: SdkInfo,
}

/// Error chain, outermost error first
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExceptionInfo {
    pub values: Vec<ExceptionValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    #[serde(rename = "type")]
    pub ty: String,

    pub value: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Snapshot of the HTTP request being served when the event was built
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cookies: HashMap<String, String>,

    /// Server variables, minus those that duplicate headers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Captured form body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Who triggered the event
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UserContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl UserContext {
    pub fn is_empty(&self) -> bool {
        self.ip_address.is_none() && self.username.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SdkInfo {
    pub name: String,
    pub version: String,
}

impl Default for SdkInfo {
    fn default() -> Self {
        let (name, version) = CLIENT_NAME
            .split_once('/')
            .unwrap_or((CLIENT_NAME, env!("CARGO_PKG_VERSION")));
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}
