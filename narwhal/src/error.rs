use std::time::Duration;

use thiserror::Error;

/// Failure while turning job options into a Job manifest. Never retried.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("rendering {template} template: {source}")]
    Template {
        template: &'static str,
        #[source]
        source: minijinja::Error,
    },

    #[error("merging job template extensions: {0}")]
    Merge(String),

    #[error("decoding job spec: {0}")]
    Decode(String),

    #[error("preparing job options: {0}")]
    Options(#[source] anyhow::Error),
}

/// Failure of a bounded poll against the cluster.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("condition failed while waiting for {what}: {source}")]
    Condition {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cancelled while waiting for {what}")]
    Cancelled { what: String },
}

impl PollError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled { .. })
    }
}

/// The log stream did not yield a well-formed result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("no logs found")]
    NoLogs,

    #[error("no result found")]
    NoResult,

    #[error("found result log with no content")]
    EmptyResult,

    #[error("{0}")]
    Runner(String),

    #[error("malformed log entry: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("scheduler {op} failed: {source}")]
    Scheduler {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("parsing runner output: {0}")]
    Parse(#[from] OutputError),

    #[error("persisting execution {id}: {source}")]
    Persistence {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("updating {resource} {name} status: {source}")]
    Status {
        resource: &'static str,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ExecutorError {
    pub fn scheduler(op: &'static str, source: anyhow::Error) -> Self {
        ExecutorError::Scheduler { op, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutorError::Poll(poll) if poll.is_cancelled())
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
