//! The child-plan protocol consumed by execution nodes.

use async_trait::async_trait;
use data_types::Labels;
use std::fmt::{Debug, Display, Formatter};

/// One `(timestamp, value)` sample of a range vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Sample timestamp, nanoseconds since the epoch.
    pub timestamp: i64,
    /// Sample value.
    pub value: f64,
}

impl Sample {
    /// Construct a sample.
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A time-series result keyed by a label map.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeVector {
    labels: Labels,
    samples: Vec<Sample>,
}

impl RangeVector {
    /// A range vector with the given key and samples.
    pub fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    /// The label map keying this series.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// The samples, in timestamp order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

/// Error produced by a child plan.
///
/// Carries an opaque message; the inner failure already happened in the
/// child and is propagated unchanged through composing nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    msg: String,
}

impl QueryError {
    /// Wrap a child failure message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "query error: {}", self.msg)
    }
}

impl std::error::Error for QueryError {}

/// One child's complete response.
#[derive(Debug, Clone)]
pub enum ChildResponse {
    /// The child's range vectors.
    Result(Vec<RangeVector>),
    /// The child failed; composition short-circuits.
    Error(QueryError),
}

/// A child execution plan that can be driven to completion.
#[async_trait]
pub trait ExecPlan: Debug + Send + Sync {
    /// Run the plan, producing its range vectors.
    async fn execute(&self) -> Result<Vec<RangeVector>, QueryError>;
}
