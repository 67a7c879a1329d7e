//! Best-effort request and user context capture
//!
//! A [`ContextProvider`] exposes the request being served through narrow,
//! independently fallible accessors. Capturing a snapshot calls each
//! accessor in isolation: an error or a panic in one of them loses that one
//! field and nothing else.
//!
//! Providers can be passed explicitly or installed for the duration of a
//! future with [`scope`], which is what the middleware does for handlers.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::ContextError;
use crate::event::{RequestContext, UserContext};
use crate::utils::panic_message;

/// Server-variable prefixes that duplicate information already captured
/// from the headers.
pub const DUPLICATE_ENV_PREFIXES: &[&str] = &["HTTP_", "ALL_"];

pub type ContextResult<T> = Result<T, ContextError>;

/// Read access to the ambient request
///
/// Every accessor defaults to [`ContextError::Unavailable`], so an
/// implementation only provides what it actually knows.
pub trait ContextProvider {
    fn url(&self) -> ContextResult<String> {
        Err(ContextError::Unavailable)
    }

    fn method(&self) -> ContextResult<String> {
        Err(ContextError::Unavailable)
    }

    fn query_string(&self) -> ContextResult<String> {
        Err(ContextError::Unavailable)
    }

    fn headers(&self) -> ContextResult<HashMap<String, String>> {
        Err(ContextError::Unavailable)
    }

    fn cookies(&self) -> ContextResult<HashMap<String, String>> {
        Err(ContextError::Unavailable)
    }

    /// CGI-style server variables (`REMOTE_ADDR`, `SERVER_NAME`, ...)
    fn server_variables(&self) -> ContextResult<HashMap<String, String>> {
        Err(ContextError::Unavailable)
    }

    fn form_data(&self) -> ContextResult<String> {
        Err(ContextError::Unavailable)
    }

    fn user_ip(&self) -> ContextResult<String> {
        Err(ContextError::Unavailable)
    }

    fn username(&self) -> ContextResult<String> {
        Err(ContextError::Unavailable)
    }
}

/// Owned copy of a captured context, served back as a provider
///
/// Lets the context outlive the request it was read from.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub request: RequestContext,
    pub user: UserContext,
}

impl Snapshot {
    pub fn capture(provider: &dyn ContextProvider) -> Self {
        let (request, user) = capture(provider);
        Self { request, user }
    }
}

fn present<T>(value: Option<&T>) -> ContextResult<T>
where
    T: Clone,
{
    value.cloned().ok_or(ContextError::Unavailable)
}

fn non_empty(map: &HashMap<String, String>) -> ContextResult<HashMap<String, String>> {
    if map.is_empty() {
        Err(ContextError::Unavailable)
    } else {
        Ok(map.clone())
    }
}

impl ContextProvider for Snapshot {
    fn url(&self) -> ContextResult<String> {
        present(self.request.url.as_ref())
    }

    fn method(&self) -> ContextResult<String> {
        present(self.request.method.as_ref())
    }

    fn query_string(&self) -> ContextResult<String> {
        present(self.request.query_string.as_ref())
    }

    fn headers(&self) -> ContextResult<HashMap<String, String>> {
        non_empty(&self.request.headers)
    }

    fn cookies(&self) -> ContextResult<HashMap<String, String>> {
        non_empty(&self.request.cookies)
    }

    fn server_variables(&self) -> ContextResult<HashMap<String, String>> {
        non_empty(&self.request.env)
    }

    fn form_data(&self) -> ContextResult<String> {
        present(self.request.data.as_ref())
    }

    fn user_ip(&self) -> ContextResult<String> {
        present(self.user.ip_address.as_ref())
    }

    fn username(&self) -> ContextResult<String> {
        present(self.user.username.as_ref())
    }
}

tokio::task_local! {
    static CURRENT_PROVIDER: Rc<dyn ContextProvider>;
}

/// Run `fut` with `provider` as the ambient context
pub async fn scope<F>(provider: Rc<dyn ContextProvider>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_PROVIDER.scope(provider, fut).await
}

/// Snapshot of the ambient provider, if one is in scope
pub fn capture_current() -> Option<(RequestContext, UserContext)> {
    CURRENT_PROVIDER
        .try_with(|provider| capture(provider.as_ref()))
        .ok()
}

/// Snapshot request and user context from `provider`
pub fn capture(provider: &dyn ContextProvider) -> (RequestContext, UserContext) {
    (capture_request(provider), capture_user(provider))
}

pub fn capture_request(provider: &dyn ContextProvider) -> RequestContext {
    RequestContext {
        url: fetch("url", || provider.url()),
        method: fetch("method", || provider.method()),
        query_string: fetch("query_string", || provider.query_string()),
        headers: fetch("headers", || provider.headers()).unwrap_or_default(),
        cookies: fetch("cookies", || provider.cookies()).unwrap_or_default(),
        env: fetch("server_variables", || provider.server_variables())
            .map(drop_duplicate_variables)
            .unwrap_or_default(),
        data: fetch("form_data", || provider.form_data()),
    }
}

pub fn capture_user(provider: &dyn ContextProvider) -> UserContext {
    UserContext {
        ip_address: fetch("user_ip", || provider.user_ip()),
        username: fetch("username", || provider.username()),
    }
}

/// Remove server variables that restate header data
pub fn drop_duplicate_variables(vars: HashMap<String, String>) -> HashMap<String, String> {
    vars.into_iter()
        .filter(|(key, _)| {
            !DUPLICATE_ENV_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
        })
        .collect()
}

/// Run one accessor, turning errors and panics into a logged `None`
fn fetch<T>(field: &str, accessor: impl FnOnce() -> ContextResult<T>) -> Option<T> {
    let outcome = catch_unwind(AssertUnwindSafe(accessor))
        .unwrap_or_else(|payload| Err(ContextError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(value) => Some(value),
        Err(ContextError::Unavailable) => None,
        Err(e) => {
            tracing::debug!(field, error = %e, "Skipping context field");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenHeaders;

    impl ContextProvider for BrokenHeaders {
        fn url(&self) -> ContextResult<String> {
            Ok("http://localhost/orders".to_string())
        }

        fn method(&self) -> ContextResult<String> {
            Ok("GET".to_string())
        }

        fn headers(&self) -> ContextResult<HashMap<String, String>> {
            Err(ContextError::failed("header collection unreadable"))
        }

        fn cookies(&self) -> ContextResult<HashMap<String, String>> {
            panic!("cookie jar exploded");
        }

        fn server_variables(&self) -> ContextResult<HashMap<String, String>> {
            Ok([
                ("REMOTE_ADDR", "10.0.0.1"),
                ("HTTP_USER_AGENT", "curl"),
                ("ALL_RAW", "Host: x"),
                ("SERVER_NAME", "api"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
        }

        fn username(&self) -> ContextResult<String> {
            Ok("alice".to_string())
        }
    }

    #[test]
    fn test_failing_fields_do_not_spoil_the_rest() {
        let (request, user) = capture(&BrokenHeaders);

        assert_eq!(request.url.as_deref(), Some("http://localhost/orders"));
        assert_eq!(request.method.as_deref(), Some("GET"));
        assert!(request.headers.is_empty());
        assert!(request.cookies.is_empty());
        assert!(request.query_string.is_none());
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert!(user.ip_address.is_none());
    }

    #[test]
    fn test_duplicate_server_variables_dropped() {
        let (request, _) = capture(&BrokenHeaders);

        assert_eq!(request.env.len(), 2);
        assert!(request.env.contains_key("REMOTE_ADDR"));
        assert!(request.env.contains_key("SERVER_NAME"));
    }

    #[test]
    fn test_snapshot_replays_captured_fields() {
        let snapshot = Snapshot::capture(&BrokenHeaders);
        let (request, user) = capture(&snapshot);

        assert_eq!(request, snapshot.request);
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_no_ambient_provider() {
        assert!(capture_current().is_none());
    }

    #[tokio::test]
    async fn test_scoped_provider_is_visible() {
        let provider: Rc<dyn ContextProvider> = Rc::new(BrokenHeaders);
        let captured = scope(provider, async { capture_current() }).await;

        let (request, _) = captured.expect("provider in scope");
        assert_eq!(request.method.as_deref(), Some("GET"));
        assert!(capture_current().is_none());
    }
}
