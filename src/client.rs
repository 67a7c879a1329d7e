//! Public capture surface
//!
//! [`RavenClient`] glues the event builder, context capture and delivery
//! pipeline together. Its capture methods always return: the collector's
//! event id on success, an empty string otherwise.

use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::auth::Clock;
use crate::builder::EventBuilder;
use crate::config::{ClientOptions, Config};
use crate::context::{self, ContextProvider};
use crate::dsn::Dsn;
use crate::error::{CaptureError, RavenError};
use crate::event::{Event, Level};
use crate::hooks::EventSerializer;
use crate::transport::DeliveryPipeline;
use crate::utils::panic_message;

/// Error-reporting client bound to one DSN
///
/// Share it across tasks through an `Arc`. Changing options (default tags
/// included) needs `&mut self`, so it cannot race with a capture in flight.
pub struct RavenClient {
    dsn: Arc<Dsn>,
    pipeline: DeliveryPipeline,
}

impl RavenClient {
    /// Build a client; fails only if `dsn` does not parse
    pub fn new(dsn: &str, options: ClientOptions) -> Result<Self, RavenError> {
        let parsed = Dsn::parse(dsn).map_err(|source| RavenError::InvalidDsn {
            dsn: dsn.to_string(),
            source,
        })?;
        let dsn = Arc::new(parsed);
        Ok(Self {
            pipeline: DeliveryPipeline::new(dsn.clone(), options),
            dsn,
        })
    }

    /// Build a client from a [`Config`], e.g. one loaded from the environment
    pub fn from_config(config: Config) -> Result<Self, RavenError> {
        let dsn = config.get_dsn()?.to_string();
        Self::new(&dsn, config.options)
    }

    /// Replace the payload serializer
    pub fn with_serializer(mut self, serializer: Arc<dyn EventSerializer>) -> Self {
        self.pipeline = self.pipeline.with_serializer(serializer);
        self
    }

    /// Replace the clock used to sign requests
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.pipeline = self.pipeline.with_clock(clock);
        self
    }

    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    pub fn options(&self) -> &ClientOptions {
        self.pipeline.options()
    }

    /// Tags merged into every event; per-call tags win on collisions
    pub fn default_tags_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.pipeline.options_mut().default_tags
    }

    /// Report an error
    ///
    /// `message` replaces the error's own text as the event message. The
    /// request in scope (see [`context::scope`]) is attached when present.
    pub async fn capture_exception<E>(
        &self,
        error: &E,
        message: Option<&str>,
        level: Level,
        tags: Option<HashMap<String, String>>,
        extra: Option<Value>,
    ) -> String
    where
        E: Error + ?Sized,
    {
        if !self.options().enabled {
            return String::new();
        }
        let built = self.build(|| {
            self.builder()
                .build_from_exception(error, message, level, tags, extra)
        });
        match built {
            Some(event) => self.deliver(event).await,
            None => String::new(),
        }
    }

    /// Report a plain message
    pub async fn capture_message(
        &self,
        message: &str,
        level: Level,
        tags: Option<HashMap<String, String>>,
        extra: Option<Value>,
    ) -> String {
        if !self.options().enabled {
            return String::new();
        }
        let built = self.build(|| self.builder().build_from_message(message, level, tags, extra));
        match built {
            Some(event) => self.deliver(event).await,
            None => String::new(),
        }
    }

    /// Report an error with context taken from `provider` instead of the
    /// ambient request
    pub async fn capture_exception_in<E>(
        &self,
        provider: &dyn ContextProvider,
        error: &E,
        message: Option<&str>,
        level: Level,
        tags: Option<HashMap<String, String>>,
        extra: Option<Value>,
    ) -> String
    where
        E: Error + ?Sized,
    {
        if !self.options().enabled {
            return String::new();
        }
        let built = self.build(|| {
            EventBuilder::from_options(self.options())
                .with_context(provider)
                .build_from_exception(error, message, level, tags, extra)
        });
        match built {
            Some(event) => self.deliver(event).await,
            None => String::new(),
        }
    }

    fn builder(&self) -> EventBuilder<'_> {
        let builder = EventBuilder::from_options(self.options());
        match context::capture_current() {
            Some((request, user)) => builder.with_snapshot(request, user),
            None => builder,
        }
    }

    /// Run event construction, reporting a panic in caller code (an error's
    /// `Display`, for one) instead of letting it unwind into the caller
    fn build(&self, build: impl FnOnce() -> Event) -> Option<Event> {
        match catch_unwind(AssertUnwindSafe(build)) {
            Ok(event) => Some(event),
            Err(payload) => {
                let error = CaptureError::Panicked(panic_message(payload.as_ref()));
                self.pipeline.report("", &error);
                None
            }
        }
    }

    async fn deliver(&self, event: Event) -> String {
        tracing::trace!(event_id = %event.event_id, level = %event.level, "Capturing event");
        self.pipeline.send(&event).await
    }
}

impl std::fmt::Debug for RavenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RavenClient")
            .field("collector", &self.dsn.collector_uri())
            .field("options", self.options())
            .finish()
    }
}
