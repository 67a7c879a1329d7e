//! Actix-Web request context
//!
//! `HttpRequest` is the ambient request for handlers wrapped by
//! [`RavenMiddleware`](crate::middleware::RavenMiddleware). This module
//! exposes it as a [`ContextProvider`] and captures form bodies so they can
//! be attached to events.

use actix_web::{
    dev::{Payload, ServiceRequest},
    error::PayloadError,
    web::{Bytes, BytesMut},
    HttpMessage, HttpRequest,
};
use futures::StreamExt;
use std::collections::HashMap;

use crate::context::{ContextProvider, ContextResult};
use crate::error::ContextError;
use crate::utils::{extract_ip, truncate_body};

/// Form bodies larger than this are cut off (10KB)
pub const MAX_BODY_SIZE: usize = 10 * 1024;

/// Form body stored in the request extensions by the middleware
#[derive(Debug, Clone)]
pub struct CapturedForm(pub String);

/// Authenticated user name; insert it into the request extensions from an
/// auth layer to have it reported with events
#[derive(Debug, Clone)]
pub struct Principal(pub String);

impl ContextProvider for HttpRequest {
    fn url(&self) -> ContextResult<String> {
        let info = self.connection_info();
        Ok(format!("{}://{}{}", info.scheme(), info.host(), self.path()))
    }

    fn method(&self) -> ContextResult<String> {
        Ok(self.method().to_string())
    }

    fn query_string(&self) -> ContextResult<String> {
        match self.query_string() {
            "" => Err(ContextError::Unavailable),
            query => Ok(query.to_string()),
        }
    }

    fn headers(&self) -> ContextResult<HashMap<String, String>> {
        Ok(header_map(self))
    }

    fn cookies(&self) -> ContextResult<HashMap<String, String>> {
        let cookies = HttpRequest::cookies(self).map_err(|e| ContextError::failed(e.to_string()))?;
        Ok(cookies
            .iter()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect())
    }

    fn server_variables(&self) -> ContextResult<HashMap<String, String>> {
        let info = self.connection_info();
        let mut vars = HashMap::new();
        vars.insert("REQUEST_METHOD".to_string(), self.method().to_string());
        vars.insert("PATH_INFO".to_string(), self.path().to_string());
        vars.insert("QUERY_STRING".to_string(), self.query_string().to_string());
        vars.insert("SERVER_PROTOCOL".to_string(), format!("{:?}", self.version()));
        vars.insert("SERVER_NAME".to_string(), info.host().to_string());
        if let Some(peer) = self.peer_addr() {
            vars.insert("REMOTE_ADDR".to_string(), peer.ip().to_string());
            vars.insert("REMOTE_PORT".to_string(), peer.port().to_string());
        }
        vars.insert(
            "SERVER_PORT".to_string(),
            self.app_config().local_addr().port().to_string(),
        );
        Ok(vars)
    }

    fn form_data(&self) -> ContextResult<String> {
        self.extensions()
            .get::<CapturedForm>()
            .map(|form| form.0.clone())
            .ok_or(ContextError::Unavailable)
    }

    fn user_ip(&self) -> ContextResult<String> {
        let peer = self.peer_addr().map(|addr| addr.ip().to_string());
        extract_ip(&header_map(self), peer.as_deref()).ok_or(ContextError::Unavailable)
    }

    fn username(&self) -> ContextResult<String> {
        self.extensions()
            .get::<Principal>()
            .map(|p| p.0.clone())
            .ok_or(ContextError::Unavailable)
    }
}

/// Lowercased header names; values that are not visible ASCII are skipped
///
/// Credentials never leave the process, and cookies are reported on their
/// own.
fn header_map(req: &HttpRequest) -> HashMap<String, String> {
    req.headers()
        .iter()
        .filter(|(name, _)| !is_sensitive_header(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

fn is_sensitive_header(name: &str) -> bool {
    matches!(
        name,
        "authorization" | "cookie" | "set-cookie" | "proxy-authorization" | "x-api-key" | "x-auth-token"
    )
}

/// Capture a text body into the request extensions as [`CapturedForm`]
///
/// Only form and text payloads are read. The payload is re-inserted so
/// handlers can still consume it.
pub async fn capture_form_body(req: &mut ServiceRequest) {
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_lowercase);

    if !content_type.as_deref().map_or(false, should_capture_body) {
        return;
    }

    // Unknown (chunked) or oversized bodies stay streaming for the handler.
    let within_limit = req
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map_or(false, |size| size <= MAX_BODY_SIZE);
    if !within_limit {
        return;
    }

    match read_and_restore_body(req).await {
        Ok(bytes) if !bytes.is_empty() => {
            let text = String::from_utf8_lossy(&bytes);
            req.extensions_mut()
                .insert(CapturedForm(truncate_body(&text, MAX_BODY_SIZE)));
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "Could not read request body"),
    }
}

/// Form and plain-text payloads only
fn should_capture_body(content_type: &str) -> bool {
    content_type.contains("application/x-www-form-urlencoded") || content_type.starts_with("text/")
}

/// Read the whole payload and put it back
///
/// Everything read is handed back to the handler; only the copy used for
/// the event is truncated.
async fn read_and_restore_body(req: &mut ServiceRequest) -> Result<Bytes, PayloadError> {
    let mut payload = req.take_payload();
    let mut buffer = BytesMut::new();

    let mut failure = None;
    while let Some(chunk) = payload.next().await {
        match chunk {
            Ok(chunk) => buffer.extend_from_slice(&chunk),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let bytes = buffer.freeze();
    req.set_payload(Payload::from(bytes.clone()));

    match failure {
        Some(e) => Err(e),
        None => Ok(bytes),
    }
}
