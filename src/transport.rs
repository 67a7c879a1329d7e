//! Delivery of events to the collector
//!
//! Each send becomes one [`Transmission`]: a spawned task that performs the
//! HTTP exchange and reports through its own oneshot channel. The caller
//! waits on that channel for at most the configured timeout.
//!
//! When the timeout fires the transmission is abandoned, not torn down. The
//! task keeps running until reqwest gives up on the connection and its
//! result is dropped. This bounds the caller's wait, at the price of
//! in-flight requests outliving the capture that started them.

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::auth::{self, Clock, SystemClock, AUTH_HEADER, CLIENT_NAME};
use crate::config::ClientOptions;
use crate::dsn::Dsn;
use crate::error::CaptureError;
use crate::event::Event;
use crate::hooks::{EventSerializer, JsonSerializer};
use crate::utils::panic_message;

/// Upper bound for establishing a connection inside an abandoned transmission
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of one transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionState {
    Created,
    AwaitingStreamOpen,
    AwaitingResponse,
    Succeeded,
    Failed,
    TimedOut,
}

impl TransmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransmissionState::Succeeded | TransmissionState::Failed | TransmissionState::TimedOut
        )
    }
}

/// Collector reply; only the id is consumed
#[derive(Deserialize, Debug)]
struct StoreResponse {
    id: String,
}

/// One in-flight send
///
/// Owns the result slot it reports through, so an abandoned transmission
/// cannot reach anyone else's capture.
struct Transmission {
    target_url: String,
    headers: HeaderMap,
    body: Vec<u8>,
    state: Arc<watch::Sender<TransmissionState>>,
    result_slot: oneshot::Sender<Result<String, CaptureError>>,
}

/// Move to `next` unless a terminal state was already reached
fn advance(state: &watch::Sender<TransmissionState>, next: TransmissionState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() {
            return false;
        }
        tracing::trace!(from = ?*current, to = ?next, "Transmission state");
        *current = next;
        true
    })
}

impl Transmission {
    async fn run(self, client: Client) {
        let Transmission {
            target_url,
            headers,
            body,
            state,
            result_slot,
        } = self;

        let outcome = Self::exchange(&client, &target_url, headers, body, &state).await;
        let finished = if outcome.is_ok() {
            TransmissionState::Succeeded
        } else {
            TransmissionState::Failed
        };

        // A timed-out waiter has already gone away; its result slot is dead.
        if !advance(&state, finished) || result_slot.send(outcome).is_err() {
            tracing::trace!(url = %target_url, "Dropping result of abandoned transmission");
        }
    }

    async fn exchange(
        client: &Client,
        target_url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
        state: &watch::Sender<TransmissionState>,
    ) -> Result<String, CaptureError> {
        advance(state, TransmissionState::AwaitingStreamOpen);
        let response = client
            .post(target_url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        advance(state, TransmissionState::AwaitingResponse);
        if !response.status().is_success() {
            return Err(CaptureError::SendFailed(response.status()));
        }

        let bytes = response.bytes().await?;
        let reply: StoreResponse =
            serde_json::from_slice(&bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
        Ok(reply.id)
    }
}

/// Serialize, sign and deliver events; absorbs every failure
pub struct DeliveryPipeline {
    dsn: Arc<Dsn>,
    options: ClientOptions,
    http: Client,
    serializer: Arc<dyn EventSerializer>,
    clock: Arc<dyn Clock>,
}

impl DeliveryPipeline {
    pub fn new(dsn: Arc<Dsn>, options: ClientOptions) -> Self {
        Self {
            dsn,
            options,
            http: build_http_client(),
            serializer: Arc::new(JsonSerializer),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn EventSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ClientOptions {
        &mut self.options
    }

    /// Deliver `event`, returning the collector's id or `""` on any failure
    pub async fn send(&self, event: &Event) -> String {
        match self.try_send(event).await {
            Ok(id) => id,
            Err(e) => {
                self.report(&event.event_id, &e);
                String::new()
            }
        }
    }

    /// Hand an absorbed failure to the error hook, or log it
    ///
    /// A panicking hook is contained and the failure is logged instead.
    pub fn report(&self, event_id: &str, error: &CaptureError) {
        if let Some(hook) = &self.options.error_on_capture {
            match catch_unwind(AssertUnwindSafe(|| hook.notify(error))) {
                Ok(()) => return,
                Err(payload) => tracing::error!(
                    event_id,
                    panic = %panic_message(payload.as_ref()),
                    "Error hook panicked"
                ),
            }
        }
        tracing::error!(event_id, error = %error, "Failed to capture event");
    }

    async fn try_send(&self, event: &Event) -> Result<String, CaptureError> {
        // Serializer and scrubber are caller code running on the caller's task.
        let body = catch_unwind(AssertUnwindSafe(|| self.encode(event)))
            .unwrap_or_else(|payload| Err(CaptureError::Panicked(panic_message(payload.as_ref()))))?;
        let headers = self.request_headers();

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CaptureError::NoRuntime)?;
        let deadline = Instant::now() + self.options.timeout;
        let (result_tx, result_rx) = oneshot::channel();
        let (state, _) = watch::channel(TransmissionState::Created);
        let state = Arc::new(state);

        let transmission = Transmission {
            target_url: self.dsn.collector_uri().to_string(),
            headers,
            body,
            state: state.clone(),
            result_slot: result_tx,
        };
        runtime.spawn(transmission.run(self.http.clone()));

        match tokio::time::timeout_at(deadline, result_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CaptureError::Abandoned),
            Err(_) => {
                let reached = *state.borrow();
                advance(&state, TransmissionState::TimedOut);
                tracing::debug!(
                    event_id = %event.event_id,
                    state = ?reached,
                    "Abandoning transmission"
                );
                Err(CaptureError::Timeout(self.options.timeout))
            }
        }
    }

    /// Serialized, scrubbed and optionally compressed body
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CaptureError> {
        let mut body = self.serializer.serialize(event)?;

        if let Some(scrubber) = &self.options.log_scrubber {
            let text = String::from_utf8_lossy(&body).into_owned();
            body = scrubber.scrub(text).into_bytes();
        }

        if self.options.debug {
            tracing::debug!(
                endpoint = %self.dsn.collector_uri(),
                payload = %String::from_utf8_lossy(&body),
                "Sending event"
            );
        }

        if self.options.compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            body = encoder.finish()?;
        }
        Ok(body)
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_NAME));
        if self.options.compression {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let signature = auth::sign(&self.dsn, self.clock.as_ref());
        match HeaderValue::from_str(&signature) {
            Ok(value) => {
                headers.insert(AUTH_HEADER, value);
            }
            // Keys with control characters; let the collector reject the request.
            Err(e) => tracing::warn!(error = %e, "Auth header is not a valid header value"),
        }
        headers
    }
}

fn build_http_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}
