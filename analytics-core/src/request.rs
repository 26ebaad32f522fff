use crate::{
    ConnectionConfig, Deserializer, Error, MAX_TIMEOUT, Result, format_duration, truncate_long,
};
use serde_json::{Map, Value};
use std::{
    fmt::{self, Display},
    sync::Arc,
    time::Duration,
};
use uuid::Uuid;

/// Requested recency of the data the query observes.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanConsistency {
    #[default]
    NotBounded,
    RequestPlus,
}

impl ScanConsistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanConsistency::NotBounded => "not_bounded",
            ScanConsistency::RequestPlus => "request_plus",
        }
    }
}

/// Per query options, every field left unset falls back to the cluster configuration.
#[derive(Default, Debug, Clone)]
pub struct QueryOptions {
    pub positional_parameters: Vec<Value>,
    pub named_parameters: Map<String, Value>,
    pub client_context_id: Option<String>,
    pub scan_consistency: Option<ScanConsistency>,
    pub readonly: Option<bool>,
    pub query_context: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub deserializer: Option<Arc<dyn Deserializer>>,
    pub chunk_size: Option<usize>,
    /// Extra top level fields sent verbatim in the request body.
    pub raw: Map<String, Value>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn positional_parameters(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.positional_parameters = values.into_iter().collect();
        self
    }
    pub fn named_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named_parameters.insert(name.into(), value);
        self
    }
    pub fn client_context_id(mut self, id: impl Into<String>) -> Self {
        self.client_context_id = Some(id.into());
        self
    }
    pub fn scan_consistency(mut self, value: ScanConsistency) -> Self {
        self.scan_consistency = Some(value);
        self
    }
    pub fn readonly(mut self, value: bool) -> Self {
        self.readonly = Some(value);
        self
    }
    pub fn query_context(mut self, value: impl Into<String>) -> Self {
        self.query_context = Some(value.into());
        self
    }
    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }
    pub fn max_retries(mut self, value: u32) -> Self {
        self.max_retries = Some(value);
        self
    }
    pub fn deserializer(mut self, value: Arc<dyn Deserializer>) -> Self {
        self.deserializer = Some(value);
        self
    }
    pub fn chunk_size(mut self, value: usize) -> Self {
        self.chunk_size = Some(value);
        self
    }
    pub fn raw(mut self, key: impl Into<String>, value: Value) -> Self {
        self.raw.insert(key.into(), value);
        self
    }
}

/// A fully resolved query, immutable for the duration of one `execute_query`.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub statement: String,
    pub client_context_id: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub chunk_size: usize,
    pub deserializer: Arc<dyn Deserializer>,
    body: Map<String, Value>,
}

impl QueryRequest {
    pub fn new(
        statement: impl Into<String>,
        options: QueryOptions,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        let statement = statement.into();
        if statement.trim().is_empty() {
            return Err(Error::invalid_argument("The statement cannot be empty"));
        }
        if options.chunk_size == Some(0) {
            return Err(Error::invalid_argument("The chunk size must be greater than zero"));
        }
        if options.timeout.is_some_and(|v| v.is_zero()) {
            return Err(Error::invalid_argument("The timeout must be greater than zero"));
        }
        if options.timeout.is_some_and(|v| v > MAX_TIMEOUT) {
            return Err(Error::invalid_argument(format!(
                "The timeout cannot exceed {:?}",
                MAX_TIMEOUT
            )));
        }
        let client_context_id = options
            .client_context_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut body = Map::new();
        body.insert("statement".into(), Value::String(statement.clone()));
        body.insert(
            "clientContextID".into(),
            Value::String(client_context_id.clone()),
        );
        if !options.positional_parameters.is_empty() {
            body.insert("args".into(), Value::Array(options.positional_parameters));
        }
        if !options.named_parameters.is_empty() {
            let named = options
                .named_parameters
                .into_iter()
                .map(|(k, v)| {
                    let k = if k.starts_with('$') { k } else { format!("${}", k) };
                    (k, v)
                })
                .collect();
            body.insert("namedArgs".into(), Value::Object(named));
        }
        if let Some(consistency) = options.scan_consistency {
            body.insert("scanConsistency".into(), consistency.as_str().into());
        }
        if let Some(readonly) = options.readonly {
            body.insert("readonly".into(), readonly.into());
        }
        if let Some(query_context) = options.query_context {
            body.insert("queryContext".into(), query_context.into());
        }
        for (key, value) in options.raw {
            body.insert(key, value);
        }
        Ok(Self {
            statement,
            client_context_id,
            timeout: options.timeout.unwrap_or(config.query_timeout),
            max_retries: options.max_retries.unwrap_or(config.max_retries),
            chunk_size: options.chunk_size.unwrap_or(config.stream.chunk_size),
            deserializer: options
                .deserializer
                .unwrap_or_else(|| config.deserializer.clone()),
            body,
        })
    }

    /// Serializes the body for one attempt, with the budget that is still left.
    pub fn body(&self, remaining: Duration, overrides: &Map<String, Value>) -> Result<Vec<u8>> {
        let mut body = self.body.clone();
        body.insert("timeout".into(), format_duration(remaining).into());
        for (key, value) in overrides {
            body.insert(key.clone(), value.clone());
        }
        serde_json::to_vec(&body)
            .map_err(|e| Error::invalid_argument("Could not serialize the request body").with_source(e))
    }

    pub fn body_fields(&self) -> &Map<String, Value> {
        &self.body
    }
}

impl Display for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", truncate_long!(self.statement))
    }
}
