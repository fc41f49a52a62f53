//! Outcome classification and batch result aggregation

use crate::error::{Status, TaskError};

/// Settled task that resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Success<I, T> {
    pub id: I,
    pub value: T,
}

/// Settled task that rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure<I> {
    pub id: I,
    pub reason: String,
    /// Transport or application status; `None` iff `is_network_error`
    pub status: Option<Status>,
    pub is_network_error: bool,
}

/// Uniform outcome of one settled task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<I, T> {
    Success(Success<I, T>),
    Failure(Failure<I>),
}

/// Classify a settled, id-correlated result. Pure mapping, no I/O.
pub fn classify<I, T>(id: I, result: Result<T, TaskError>) -> Outcome<I, T> {
    match result {
        Ok(value) => Outcome::Success(Success { id, value }),
        Err(e) => Outcome::Failure(Failure {
            status: e.status(),
            is_network_error: e.is_network(),
            reason: e.message().to_string(),
            id,
        }),
    }
}

impl<I> Failure<I> {
    /// Status-keyed remediation hint for display next to the raw reason.
    pub fn remediation(&self) -> &'static str {
        if self.is_network_error {
            return "Request never reached the server; check connectivity and the base URL";
        }
        match self.status.as_ref().and_then(Status::code) {
            Some(401) => "Token is invalid or expired; generate a new access token",
            Some(403) => "Token lacks permission for this resource; check the account role",
            Some(404) => "Resource not found; verify the course or item id",
            Some(422) => "Request was rejected as invalid; check the submitted fields",
            Some(429) => "Rate limited; lower the batch size or raise the inter-batch delay",
            Some(502 | 504) => "Gateway error or timeout; retry later with a smaller batch size",
            Some(500..=599) => "Server error; retry later",
            Some(_) => "Unexpected response; see the reason for details",
            None => "Operation reported an application error; see the reason for details",
        }
    }
}

/// Aggregated outcome of one executor run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<I, T> {
    pub successful: Vec<Success<I, T>>,
    pub failed: Vec<Failure<I>>,
    /// Stopped at a window boundary because cancellation was requested
    pub cancelled: bool,
}

impl<I, T> Default for BatchResult<I, T> {
    fn default() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }
}

impl<I, T> BatchResult<I, T> {
    pub fn push(&mut self, outcome: Outcome<I, T>) {
        match outcome {
            Outcome::Success(s) => self.successful.push(s),
            Outcome::Failure(f) => self.failed.push(f),
        }
    }

    /// Number of settled tasks
    pub fn processed(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.failed.is_empty()
    }

    /// e.g. "8 of 10 succeeded" or "2 of 8 succeeded (cancelled)"
    pub fn summary_line(&self, total: usize) -> String {
        let mut line = format!("{} of {} succeeded", self.successful.len(), total);
        if self.cancelled {
            line.push_str(" (cancelled)");
        }
        line
    }
}
