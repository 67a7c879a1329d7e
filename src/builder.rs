//! Translating errors and messages into events

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::error::Error;

use crate::config::ClientOptions;
use crate::context::{self, ContextProvider};
use crate::event::{Event, ExceptionInfo, ExceptionValue, Level, RequestContext, SdkInfo, UserContext};
use crate::utils::{current_timestamp, generate_event_id, merge_tags};

/// Platform reported with every event
pub const PLATFORM: &str = "rust";

/// Error chains deeper than this are cut off
const MAX_CHAIN_DEPTH: usize = 32;

/// Builds events for one capture
///
/// Holds the defaults every event receives; the context snapshot is
/// optional and attached with [`EventBuilder::with_context`].
#[derive(Debug, Clone)]
pub struct EventBuilder<'a> {
    logger: &'a str,
    default_tags: &'a HashMap<String, String>,
    release: Option<&'a str>,
    environment: Option<&'a str>,
    server_name: Option<&'a str>,
    request: Option<RequestContext>,
    user: Option<UserContext>,
}

impl<'a> EventBuilder<'a> {
    pub fn from_options(options: &'a ClientOptions) -> Self {
        Self {
            logger: &options.logger,
            default_tags: &options.default_tags,
            release: options.release.as_deref(),
            environment: options.environment.as_deref(),
            server_name: options.server_name.as_deref(),
            request: None,
            user: None,
        }
    }

    /// Snapshot `provider` into the events built from here on
    pub fn with_context(self, provider: &dyn ContextProvider) -> Self {
        let (request, user) = context::capture(provider);
        self.with_snapshot(request, user)
    }

    /// Attach an already captured snapshot
    pub fn with_snapshot(mut self, request: RequestContext, user: UserContext) -> Self {
        self.request = Some(request);
        self.user = (!user.is_empty()).then_some(user);
        self
    }

    /// Event for `error` and its `source()` chain
    ///
    /// The message is `override_message` when given, otherwise the error's
    /// own `Display` output.
    pub fn build_from_exception<E>(
        &self,
        error: &E,
        override_message: Option<&str>,
        level: Level,
        tags: Option<HashMap<String, String>>,
        extra: Option<Value>,
    ) -> Event
    where
        E: Error + ?Sized,
    {
        let type_name = short_type_name(std::any::type_name::<E>());
        let exception = exception_chain(error, &type_name);
        let message = override_message
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());

        let mut event = self.base(message, level, tags, extra);
        event.culprit = Some(type_name);
        event.exception = Some(exception);
        event
    }

    pub fn build_from_message(
        &self,
        message: &str,
        level: Level,
        tags: Option<HashMap<String, String>>,
        extra: Option<Value>,
    ) -> Event {
        self.base(message.to_string(), level, tags, extra)
    }

    fn base(
        &self,
        message: String,
        level: Level,
        tags: Option<HashMap<String, String>>,
        extra: Option<Value>,
    ) -> Event {
        Event {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            level,
            logger: self.logger.to_string(),
            platform: PLATFORM.to_string(),
            message,
            culprit: None,
            exception: None,
            tags: merge_tags(self.default_tags, tags),
            extra: extra.map(into_object),
            request: self.request.clone(),
            user: self.user.clone(),
            server_name: self.server_name.map(str::to_string),
            release: self.release.map(str::to_string),
            environment: self.environment.map(str::to_string),
            sdk: SdkInfo::default(),
        }
    }
}

fn exception_chain<E>(error: &E, type_name: &str) -> ExceptionInfo
where
    E: Error + ?Sized,
{
    let (module, ty) = split_module(type_name);
    let mut values = vec![ExceptionValue {
        ty,
        value: error.to_string(),
        module,
    }];

    // Sources are type-erased; only their messages survive.
    let mut source = error.source();
    while let Some(cause) = source {
        if values.len() >= MAX_CHAIN_DEPTH {
            break;
        }
        values.push(ExceptionValue {
            ty: "Caused by".to_string(),
            value: cause.to_string(),
            module: None,
        });
        source = cause.source();
    }

    ExceptionInfo { values }
}

/// Non-object extra values are wrapped as `{"value": ...}`
fn into_object(extra: Value) -> Map<String, Value> {
    match extra {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// `std::io::error::Error` -> `io::error::Error`; generic arguments kept
///
/// Trait objects only keep the trait's own name: `dyn Error`.
fn short_type_name(full: &str) -> String {
    if let Some(object) = full.strip_prefix("dyn ") {
        let principal = object.split(" +").next().unwrap_or(object);
        let name = principal.rsplit("::").next().unwrap_or(principal);
        return format!("dyn {name}");
    }
    full.strip_prefix("std::")
        .or_else(|| full.strip_prefix("core::"))
        .unwrap_or(full)
        .to_string()
}

fn split_module(type_name: &str) -> (Option<String>, String) {
    if type_name.starts_with("dyn ") {
        return (None, type_name.to_string());
    }
    let path = type_name.split('<').next().unwrap_or(type_name);
    match path.rfind("::") {
        Some(idx) => (
            Some(path[..idx].to_string()),
            type_name[idx + 2..].to_string(),
        ),
        None => (None, type_name.to_string()),
    }
}
