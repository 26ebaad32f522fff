use crate::truncate_long;
use std::fmt::{self, Display};

/// Per-call diagnostic record of the physical attempts made for one query.
///
/// Created by the dispatcher for every `execute_query`, updated only while
/// attempts are being made, then attached read-only to the resulting
/// [`QueryResult`](crate::QueryResult) or [`Error`](crate::Error).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Physical attempts made so far.
    pub num_attempts: u32,
    /// Remote endpoint of the latest attempt, when the transport reported it.
    pub last_dispatched_to: Option<String>,
    /// Local address of the latest attempt, when the transport reported it.
    pub last_dispatched_from: Option<String>,
    /// Set once the dispatcher stops issuing attempts for this request.
    pub is_shutdown: bool,
    pub statement: String,
    pub client_context_id: String,
}

impl RequestContext {
    pub fn new(statement: impl Into<String>, client_context_id: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            client_context_id: client_context_id.into(),
            ..Default::default()
        }
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.num_attempts += 1;
        self.num_attempts
    }

    pub(crate) fn record_dispatch(&mut self, to: Option<String>, from: Option<String>) {
        if to.is_some() {
            self.last_dispatched_to = to;
        }
        if from.is_some() {
            self.last_dispatched_from = from;
        }
    }

    pub(crate) fn shutdown(mut self) -> Self {
        self.is_shutdown = true;
        self
    }
}

impl Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{\"num_attempts\": {}", self.num_attempts)?;
        if let Some(to) = &self.last_dispatched_to {
            write!(f, ", \"last_dispatched_to\": \"{}\"", to)?;
        }
        if let Some(from) = &self.last_dispatched_from {
            write!(f, ", \"last_dispatched_from\": \"{}\"", from)?;
        }
        if !self.client_context_id.is_empty() {
            write!(f, ", \"client_context_id\": \"{}\"", self.client_context_id)?;
        }
        if !self.statement.is_empty() {
            write!(f, ", \"statement\": {:?}", truncate_long!(self.statement).to_string())?;
        }
        write!(f, "}}")
    }
}
