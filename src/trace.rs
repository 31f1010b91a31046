//! Per-evaluation traces and the observers that consume them.
//!
//! A [`ScriptTrace`] is built once an evaluation attempt finishes, handed to
//! the configured [`TraceEnhancer`]s (default first, then the request's own),
//! and finally to the success or error [`TraceListener`]. The evaluator keeps
//! no reference to it afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::config::ScriptingConfig;
use crate::error::{EngineError, ObserverError};
use crate::request::EvaluationRequest;

/// Ordered tag map. Re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceTags {
    entries: Vec<(String, String)>,
}

impl TraceTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tag and returns the previous value for `key`, if any.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for TraceTags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TraceOutcome {
    Success,
    Failure,
}

/// Record of one evaluation attempt.
#[derive(Debug, Clone)]
pub struct ScriptTrace {
    id: Uuid,
    started_at: DateTime<Utc>,
    request: EvaluationRequest,
    duration: Duration,
    error: Option<EngineError>,
    tags: TraceTags,
}

impl ScriptTrace {
    pub fn success(
        request: EvaluationRequest,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self::new(request, started_at, duration, None)
    }

    pub fn failure(
        request: EvaluationRequest,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: EngineError,
    ) -> Self {
        Self::new(request, started_at, duration, Some(error))
    }

    fn new(
        request: EvaluationRequest,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: Option<EngineError>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            request,
            duration,
            error,
            tags: TraceTags::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn request(&self) -> &EvaluationRequest {
        &self.request
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn outcome(&self) -> TraceOutcome {
        if self.is_success() {
            TraceOutcome::Success
        } else {
            TraceOutcome::Failure
        }
    }

    pub fn tags(&self) -> &TraceTags {
        &self.tags
    }

    pub fn add_tag<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key, value)
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            id: self.id,
            started_at: self.started_at,
            language: self.request.language().to_string(),
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            outcome: self.outcome(),
            error: self.error.as_ref().map(ToString::to_string),
            tags: self.tags.clone(),
        }
    }
}

/// Serializable view of a trace for listeners that archive traces.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub language: String,
    pub duration_ms: u64,
    pub outcome: TraceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tags: TraceTags,
}

/// Adds diagnostic tags to a finished trace.
pub trait TraceEnhancer: Send + Sync {
    fn enhance(&self, trace: &mut ScriptTrace) -> Result<(), ObserverError>;
}

impl<F> TraceEnhancer for F
where
    F: Fn(&mut ScriptTrace) -> Result<(), ObserverError> + Send + Sync,
{
    fn enhance(&self, trace: &mut ScriptTrace) -> Result<(), ObserverError> {
        self(trace)
    }
}

/// Receives finished traces. Failures are logged by the evaluator and dropped.
#[cfg_attr(test, mockall::automock)]
pub trait TraceListener: Send + Sync {
    fn on_trace(&self, trace: &ScriptTrace) -> Result<(), ObserverError>;
}

impl<F> TraceListener for F
where
    F: Fn(&ScriptTrace) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_trace(&self, trace: &ScriptTrace) -> Result<(), ObserverError> {
        self(trace)
    }
}

/// Enhancer that adds a fixed set of tags to every trace.
#[derive(Debug, Clone, Default)]
pub struct StaticTagsEnhancer {
    tags: BTreeMap<String, String>,
}

impl StaticTagsEnhancer {
    pub fn new(tags: BTreeMap<String, String>) -> Self {
        Self { tags }
    }

    pub fn from_config(config: &ScriptingConfig) -> Self {
        Self::new(config.default_tags.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl TraceEnhancer for StaticTagsEnhancer {
    fn enhance(&self, trace: &mut ScriptTrace) -> Result<(), ObserverError> {
        for (key, value) in &self.tags {
            trace.add_tag(key.as_str(), value.as_str());
        }
        Ok(())
    }
}
