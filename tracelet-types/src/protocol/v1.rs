//! Version 1 of the tracelet data model.
//!
//! Events, transactions and their parts.  Every type here serializes to the
//! JSON shape the ingestion endpoint reads from an [`Envelope`] item.
//! Missing fields fall back to the type's `Default` when deserializing.

use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::utils::{seconds, seconds_opt};

pub use super::envelope::*;
pub use serde_json::Value;

/// Ordered map used for tags, extra data and contexts.
pub use std::collections::BTreeMap as Map;

/// Severity of an event or breadcrumb.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    /// Verbose diagnostics.
    Debug,
    /// Informational.
    #[default]
    Info,
    /// Something looks wrong.
    Warning,
    /// An operation failed.
    Error,
    /// The process cannot continue.
    Fatal,
}

/// Error for an unknown [`Level`] name.
#[derive(Debug, Error)]
#[error("invalid level")]
pub struct ParseLevelError;

impl Level {
    const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Fatal,
    ];

    /// The lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(name: &str) -> Result<Level, ParseLevelError> {
        if name == "log" {
            return Ok(Level::Info);
        }
        Level::ALL
            .into_iter()
            .find(|level| level.as_str() == name)
            .ok_or(ParseLevelError)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_str_serde!(Level, "a level name");

fn is_info(level: &Level) -> bool {
    *level == Level::Info
}

fn is_error(level: &Level) -> bool {
    *level == Level::Error
}

const DEFAULT_CRUMB_TYPE: &str = "default";

fn is_default_crumb_type(ty: &str) -> bool {
    ty == DEFAULT_CRUMB_TYPE
}

/// A record of something that happened before an event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Breadcrumb {
    /// When it happened.
    #[serde(with = "seconds")]
    pub timestamp: SystemTime,
    /// Rendering hint, `"default"` unless set.
    #[serde(rename = "type", skip_serializing_if = "is_default_crumb_type")]
    pub ty: String,
    /// Free-form grouping such as `"http"` or `"ui.click"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Severity, `info` unless set.
    #[serde(skip_serializing_if = "is_info")]
    pub level: Level,
    /// Human readable text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured payload.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Default for Breadcrumb {
    fn default() -> Breadcrumb {
        Breadcrumb {
            timestamp: SystemTime::now(),
            ty: DEFAULT_CRUMB_TYPE.to_owned(),
            category: None,
            level: Level::Info,
            message: None,
            data: Map::new(),
        }
    }
}

/// The user affected by an event.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct User {
    /// Application specific id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Email address, stripped unless PII sending is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Remote address, stripped unless PII sending is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// One error in an error chain.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Exception {
    /// Type name of the error.
    #[serde(rename = "type")]
    pub ty: String,
    /// The error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Module the error type lives in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Name and version of the library that produced a payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientSdkInfo {
    /// SDK name, for example `tracelet.rust`.
    pub name: String,
    /// SDK version.
    pub version: String,
}

/// 8 byte span identifier, random by default.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SpanId([u8; 8]);

impl_hex_id!(SpanId, 8, "a span id");

/// 16 byte trace identifier, random by default.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TraceId([u8; 16]);

impl_hex_id!(TraceId, 16, "a trace id");

/// Error for an unknown [`SpanStatus`] name.
#[derive(Debug, Error)]
#[error("invalid span status")]
pub struct ParseStatusError;

/// How the operation measured by a span ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SpanStatus {
    /// Completed normally.
    Ok,
    /// Timed out.
    DeadlineExceeded,
    /// Missing or bad credentials.
    Unauthenticated,
    /// Not allowed.
    PermissionDenied,
    /// The target does not exist.
    NotFound,
    /// Rate limited or out of quota.
    ResourceExhausted,
    /// Rejected input.
    InvalidArgument,
    /// Dependency unreachable.
    Unavailable,
    /// Failed inside the callee.
    InternalError,
    /// Anything that fits no other status.
    UnknownError,
    /// Cancelled by the caller.
    Cancelled,
    /// Gave up, usually on a concurrency conflict.
    Aborted,
}

impl SpanStatus {
    const ALL: [SpanStatus; 12] = [
        SpanStatus::Ok,
        SpanStatus::DeadlineExceeded,
        SpanStatus::Unauthenticated,
        SpanStatus::PermissionDenied,
        SpanStatus::NotFound,
        SpanStatus::ResourceExhausted,
        SpanStatus::InvalidArgument,
        SpanStatus::Unavailable,
        SpanStatus::InternalError,
        SpanStatus::UnknownError,
        SpanStatus::Cancelled,
        SpanStatus::Aborted,
    ];

    /// The snake case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::DeadlineExceeded => "deadline_exceeded",
            SpanStatus::Unauthenticated => "unauthenticated",
            SpanStatus::PermissionDenied => "permission_denied",
            SpanStatus::NotFound => "not_found",
            SpanStatus::ResourceExhausted => "resource_exhausted",
            SpanStatus::InvalidArgument => "invalid_argument",
            SpanStatus::Unavailable => "unavailable",
            SpanStatus::InternalError => "internal_error",
            SpanStatus::UnknownError => "unknown_error",
            SpanStatus::Cancelled => "cancelled",
            SpanStatus::Aborted => "aborted",
        }
    }
}

impl FromStr for SpanStatus {
    type Err = ParseStatusError;

    fn from_str(name: &str) -> Result<SpanStatus, ParseStatusError> {
        match name {
            "failure" => Ok(SpanStatus::InternalError),
            "unknown" => Ok(SpanStatus::UnknownError),
            _ => SpanStatus::ALL
                .into_iter()
                .find(|status| status.as_str() == name)
                .ok_or(ParseStatusError),
        }
    }
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_str_serde!(SpanStatus, "a span status");

fn elapsed(start: SystemTime, end: Option<SystemTime>) -> Option<Duration> {
    Some(end?.duration_since(start).unwrap_or_default())
}

/// A finished child span as it is stored inside a [`Transaction`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Span {
    /// Id of this span.
    pub span_id: SpanId,
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// The enclosing span, `None` only for detached spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Operation category such as `"db.query"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// What the span did, in words.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// End time, `None` while running.
    #[serde(skip_serializing_if = "Option::is_none", with = "seconds_opt")]
    pub timestamp: Option<SystemTime>,
    /// Start time.
    #[serde(with = "seconds")]
    pub start_timestamp: SystemTime,
    /// Outcome, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    /// Indexed string attributes.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, String>,
    /// Arbitrary attributes.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Default for Span {
    fn default() -> Self {
        Span {
            span_id: SpanId::default(),
            trace_id: TraceId::default(),
            parent_span_id: None,
            op: None,
            description: None,
            timestamp: None,
            start_timestamp: SystemTime::now(),
            status: None,
            tags: Map::new(),
            data: Map::new(),
        }
    }
}

impl Span {
    /// Stamps the end time.
    pub fn finish(&mut self) {
        self.timestamp = Some(SystemTime::now());
    }

    /// Time between start and end, `None` until finished.
    pub fn duration(&self) -> Option<Duration> {
        elapsed(self.start_timestamp, self.timestamp)
    }
}

/// The `trace` context attached to events and transactions.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TraceContext {
    /// Id of the transaction root span.
    pub span_id: SpanId,
    /// Id shared by every span in the trace.
    pub trace_id: TraceId,
    /// Remote parent, when continuing a trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Operation of the root span.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Outcome of the root span.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
}

impl From<TraceContext> for Value {
    fn from(context: TraceContext) -> Value {
        serde_json::to_value(context).unwrap_or(Value::Null)
    }
}

// Payload ids go over the wire without dashes.
fn simple_uuid<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&id.as_simple())
}

const PLATFORM: &str = "native";

fn is_default_platform(platform: &str) -> bool {
    platform == PLATFORM
}

/// An error or message report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Event {
    /// Unique id, random by default.
    #[serde(serialize_with = "simple_uuid")]
    pub event_id: Uuid,
    /// Severity, `error` unless set.
    #[serde(skip_serializing_if = "is_error")]
    pub level: Level,
    /// Free-form text for message events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error chain, root cause first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exception: Vec<Exception>,
    /// Capture time.
    #[serde(with = "seconds")]
    pub timestamp: SystemTime,
    /// Origin platform, `native` unless set.
    #[serde(skip_serializing_if = "is_default_platform")]
    pub platform: String,
    /// Release of the reporting application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Deployment environment, such as `production`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Host that reported the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Name of the active transaction when the event was captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Affected user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Indexed string tags.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, String>,
    /// Unindexed extra data.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Named context objects, `trace` among them.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub contexts: Map<String, Value>,
    /// Oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Reporting SDK.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk: Option<ClientSdkInfo>,
}

impl Default for Event {
    fn default() -> Self {
        Event {
            event_id: crate::random_uuid(),
            level: Level::Error,
            message: None,
            exception: Vec::new(),
            timestamp: SystemTime::now(),
            platform: PLATFORM.to_owned(),
            release: None,
            environment: None,
            server_name: None,
            transaction: None,
            user: None,
            tags: Map::new(),
            extra: Map::new(),
            contexts: Map::new(),
            breadcrumbs: Vec::new(),
            sdk: None,
        }
    }
}

impl Event {
    /// An empty `error` level event with a fresh id.
    pub fn new() -> Event {
        Event::default()
    }
}

/// A finished root span together with its finished children.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Transaction {
    /// Unique id, random by default.
    #[serde(serialize_with = "simple_uuid")]
    pub event_id: Uuid,
    /// Name of the transaction, usually the route or job.
    #[serde(rename = "transaction", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Release of the reporting application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Deployment environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// User the transaction ran for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Indexed string tags.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, String>,
    /// Unindexed extra data.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Reporting SDK.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk: Option<ClientSdkInfo>,
    /// Origin platform, `native` unless set.
    #[serde(skip_serializing_if = "is_default_platform")]
    pub platform: String,
    /// End time, `None` while running.
    #[serde(skip_serializing_if = "Option::is_none", with = "seconds_opt")]
    pub timestamp: Option<SystemTime>,
    /// Start time of the root span.
    #[serde(with = "seconds")]
    pub start_timestamp: SystemTime,
    /// Finished child spans.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
    /// Named context objects, `trace` among them.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub contexts: Map<String, Value>,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            event_id: crate::random_uuid(),
            name: None,
            release: None,
            environment: None,
            user: None,
            tags: Map::new(),
            extra: Map::new(),
            sdk: None,
            platform: PLATFORM.to_owned(),
            timestamp: None,
            start_timestamp: SystemTime::now(),
            spans: Vec::new(),
            contexts: Map::new(),
        }
    }
}

impl Transaction {
    /// An unnamed, unfinished transaction starting now.
    pub fn new() -> Self {
        Transaction::default()
    }

    /// Stamps the end time.
    pub fn finish(&mut self) {
        self.timestamp = Some(SystemTime::now());
    }

    /// Time between start and end, `None` until finished.
    pub fn duration(&self) -> Option<Duration> {
        elapsed(self.start_timestamp, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_status_aliases() {
        assert_eq!("failure".parse::<SpanStatus>().unwrap(), SpanStatus::InternalError);
        assert_eq!("unknown".parse::<SpanStatus>().unwrap(), SpanStatus::UnknownError);
        assert_eq!(SpanStatus::ResourceExhausted.to_string(), "resource_exhausted");
        assert!("teapot".parse::<SpanStatus>().is_err());
    }

    #[test]
    fn missing_fields_use_defaults() {
        let event: Event = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(event.level, Level::Error);
        assert_eq!(event.platform, "native");

        let crumb: Breadcrumb = serde_json::from_str(r#"{"timestamp":10.5}"#).unwrap();
        assert_eq!(crumb.ty, "default");
        assert_eq!(crumb.level, Level::Info);
    }

    #[test]
    fn event_defaults_are_omitted() {
        let event = Event {
            event_id: Uuid::nil(),
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(2),
            ..Event::new()
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event_id": "00000000000000000000000000000000",
                "timestamp": 2.0,
            })
        );
    }

    #[test]
    fn duration_needs_end() {
        let mut span = Span::default();
        assert_eq!(span.duration(), None);
        span.finish();
        assert!(span.duration().is_some());
    }
}
