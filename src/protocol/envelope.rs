use super::command::GET_CHARACTERS;
use serde::Serialize;
use serde_json::Value;

/// Status value the worker emits once it is accepting commands.
pub const STATUS_READY: &str = "ready";

/// Command sent automatically after the first `ready` envelope.
pub const INITIAL_REQUEST: &str = GET_CHARACTERS;

/// A complete line that parsed as JSON.
///
/// The raw text is kept so it can be forwarded verbatim; the parsed value is kept so
/// downstream consumers never parse the same line twice.
#[derive(Debug, Clone)]
pub struct Envelope {
    raw: String,
    value: Value,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed line {line:?}: {source}")]
pub struct MalformedLine {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

impl Envelope {
    /// Decode one complete line. Blank lines yield `None`.
    pub fn decode(line: &str) -> Option<Result<Envelope, MalformedLine>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(
            serde_json::from_str::<Value>(trimmed)
                .map(|value| Envelope {
                    raw: trimmed.to_string(),
                    value,
                })
                .map_err(|source| MalformedLine {
                    line: trimmed.to_string(),
                    source,
                }),
        )
    }

    /// Serialize a host-produced envelope.
    pub fn from_serialize<T: Serialize>(payload: &T) -> serde_json::Result<Envelope> {
        let value = serde_json::to_value(payload)?;
        let raw = serde_json::to_string(&value)?;
        Ok(Envelope { raw, value })
    }

    /// The status discriminator, when the document is an object carrying one.
    pub fn status(&self) -> Option<&str> {
        self.value().get("status").and_then(Value::as_str)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

/// Fires the initial request exactly once per worker lifetime.
#[derive(Debug, Default)]
pub struct ReadyHandshake {
    fired: bool,
}

impl ReadyHandshake {
    /// Returns the command to send when `env` is the first `ready` envelope seen.
    pub fn observe(&mut self, env: &Envelope) -> Option<&'static str> {
        if self.fired || env.status() != Some(STATUS_READY) {
            return None;
        }
        self.fired = true;
        Some(INITIAL_REQUEST)
    }
}

/// Envelopes produced by the host itself rather than the worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostEnvelope {
    BuildStringSaved {
        class: String,
        spec: String,
        build_type: String,
    },
    TalentBuildsLoaded {
        builds: Value,
    },
    TalentTree {
        class: String,
        spec: String,
        tree: Value,
    },
}
