//! Tagged report body variants.
//!
//! The ingestion API accepts exactly one of `message`, `trace`,
//! `trace_chain`, or `crash_report` under the `body` key. Rather than
//! packing arbitrary values reflectively, callers pick a variant through an
//! explicit constructor; [`Body::arbitrary`] covers free-form key/value
//! payloads and serializes them as a `message` body.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};

/// One reported exception inside a `trace` body.
#[derive(Clone, Debug, Serialize)]
pub struct ExceptionInfo {
    /// Exception class or error type name.
    pub class: String,
    /// Exception message, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Longer human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExceptionInfo {
    /// Builds an exception record from a class name and message.
    #[must_use]
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        ExceptionInfo {
            class: class.into(),
            message: Some(message.into()),
            description: None,
        }
    }
}

/// A single stack frame inside a `trace` body.
///
/// Frame extraction from live errors is a collaborator concern; the agent
/// only ships whatever frames the caller provides.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Frame {
    /// Source file of the frame.
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// An exception plus its frames.
#[derive(Clone, Debug, Serialize)]
pub struct Trace {
    pub frames: Vec<Frame>,
    pub exception: ExceptionInfo,
}

/// Report content: exactly one of the ingestion API's body kinds.
#[derive(Clone, Debug)]
pub enum Body {
    /// A plain text message with optional extra key/value data.
    Message {
        /// The message text.
        text: String,
        /// Additional keys merged into the message object.
        extra: Map<String, Value>,
    },
    /// A single exception with frames.
    Trace(Trace),
    /// A chain of exceptions, innermost cause last.
    TraceChain(Vec<Trace>),
    /// A raw platform crash report.
    CrashReport {
        /// Raw report text.
        raw: String,
    },
    /// Free-form key/value payload, shipped as a `message` body.
    Arbitrary(Map<String, Value>),
}

impl Body {
    /// A plain message body.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Body::Message {
            text: text.into(),
            extra: Map::new(),
        }
    }

    /// A message body with extra key/value data merged alongside the text.
    #[must_use]
    pub fn message_with(text: impl Into<String>, extra: Map<String, Value>) -> Self {
        Body::Message {
            text: text.into(),
            extra,
        }
    }

    /// A `trace` body for one exception.
    #[must_use]
    pub fn trace(exception: ExceptionInfo, frames: Vec<Frame>) -> Self {
        Body::Trace(Trace { frames, exception })
    }

    /// A `trace_chain` body for a causal chain of exceptions.
    #[must_use]
    pub fn trace_chain(traces: Vec<Trace>) -> Self {
        Body::TraceChain(traces)
    }

    /// Builds a `trace` or `trace_chain` body by walking an error's
    /// `source()` chain. No frames are captured.
    #[must_use]
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut traces = vec![Trace {
            frames: Vec::new(),
            exception: ExceptionInfo {
                class: error_class(error),
                message: Some(error.to_string()),
                description: None,
            },
        }];
        let mut source = error.source();
        while let Some(cause) = source {
            traces.push(Trace {
                frames: Vec::new(),
                exception: ExceptionInfo {
                    class: error_class(cause),
                    message: Some(cause.to_string()),
                    description: None,
                },
            });
            source = cause.source();
        }
        if traces.len() == 1 {
            Body::Trace(traces.remove(0))
        } else {
            Body::TraceChain(traces)
        }
    }

    /// A raw crash report body.
    #[must_use]
    pub fn crash_report(raw: impl Into<String>) -> Self {
        Body::CrashReport { raw: raw.into() }
    }

    /// A free-form key/value body. Entries land inside the `message`
    /// object, so callers conventionally include a `body` key with the
    /// human-readable summary.
    #[must_use]
    pub fn arbitrary(map: Map<String, Value>) -> Self {
        Body::Arbitrary(map)
    }
}

fn error_class(error: &(dyn std::error::Error + 'static)) -> String {
    // The concrete type name is unavailable through the trait object; the
    // Debug representation's leading token is the closest stable stand-in.
    let debug = format!("{error:?}");
    debug
        .split([' ', '{', '('])
        .next()
        .unwrap_or("Error")
        .to_string()
}

impl Serialize for Body {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Body::Message { text, extra } => {
                let mut object = extra.clone();
                object.insert("body".to_string(), Value::String(text.clone()));
                map.serialize_entry("message", &object)?;
            }
            Body::Trace(trace) => map.serialize_entry("trace", trace)?,
            Body::TraceChain(traces) => map.serialize_entry("trace_chain", traces)?,
            Body::CrashReport { raw } => {
                let mut object = Map::new();
                object.insert("raw".to_string(), Value::String(raw.clone()));
                map.serialize_entry("crash_report", &object)?;
            }
            Body::Arbitrary(object) => map.serialize_entry("message", object)?,
        }
        map.end()
    }
}
