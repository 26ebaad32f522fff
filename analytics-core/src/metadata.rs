use crate::{Error, Result, ServiceErrorEntry, parse_duration};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Non fatal notice attached to a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryWarning {
    pub code: i64,
    pub msg: String,
}

/// Execution statistics of a completed query.
///
/// Durations are kept exactly as the service reported them, see
/// [`QueryMetrics::elapsed`] and siblings for the parsed values.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryMetrics {
    pub elapsed_time: String,
    pub execution_time: String,
    pub compile_time: String,
    pub queue_wait_time: String,
    pub result_count: u64,
    pub result_size: u64,
    pub processed_objects: u64,
    pub error_count: u64,
    pub warning_count: u64,
}

impl QueryMetrics {
    pub fn elapsed(&self) -> Option<Duration> {
        parse_duration(&self.elapsed_time)
    }
    pub fn execution(&self) -> Option<Duration> {
        parse_duration(&self.execution_time)
    }
    pub fn compile(&self) -> Option<Duration> {
        parse_duration(&self.compile_time)
    }
    pub fn queue_wait(&self) -> Option<Duration> {
        parse_duration(&self.queue_wait_time)
    }
}

/// Trailing information of a response, known only once its stream is closed.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct QueryMetadata {
    pub request_id: Option<String>,
    pub client_context_id: Option<String>,
    pub status: Option<String>,
    pub signature: Option<Value>,
    pub plans: Option<Value>,
    pub warnings: Vec<QueryWarning>,
    pub metrics: QueryMetrics,
}

/// Every top level field of a response except the rows.
#[derive(Default, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct Envelope {
    #[serde(rename = "requestID")]
    request_id: Option<String>,
    #[serde(rename = "clientContextID")]
    client_context_id: Option<String>,
    status: Option<String>,
    signature: Option<Value>,
    plans: Option<Value>,
    warnings: Vec<QueryWarning>,
    metrics: QueryMetrics,
    pub(crate) errors: Vec<ServiceErrorEntry>,
}

impl Envelope {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            Error::protocol("The response envelope is not a valid result document").with_source(e)
        })
    }

    pub(crate) fn into_metadata(self) -> QueryMetadata {
        QueryMetadata {
            request_id: self.request_id,
            client_context_id: self.client_context_id,
            status: self.status,
            signature: self.signature,
            plans: self.plans,
            warnings: self.warnings,
            metrics: self.metrics,
        }
    }
}
