//! Label-based set operations over the range vectors of two child plan
//! groups.

use crate::plan::{ChildResponse, ExecPlan, QueryError, RangeVector};
use data_types::Labels;
use futures::stream::BoxStream;
use futures::StreamExt;
use hashbrown::HashSet;
use snafu::{ensure, Snafu};
use std::sync::Arc;
use tracing::debug;

/// The reserved metric-name label. Never part of a join key, and not
/// allowed in an `on` clause.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// How many child plans run concurrently during [`SetOperatorExec::execute`].
const MAX_CONCURRENT_CHILDREN: usize = 4;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("invalid join: {}", reason))]
    InvalidJoin { reason: String },

    #[snafu(display("received {} child responses, expected {}", received, expected))]
    InsufficientResponses { received: usize, expected: usize },

    #[snafu(display("child query failed: {}", source))]
    Child { source: QueryError },

    #[snafu(display("bad query: {}", msg))]
    BadQuery { msg: String },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The three label-join set operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    /// Intersection: keep lhs vectors whose join key appears on the rhs.
    And,
    /// Union: all lhs vectors, then rhs vectors with unseen join keys.
    Or,
    /// Difference: keep lhs vectors whose join key does not appear on the
    /// rhs.
    Unless,
}

impl std::fmt::Display for SetOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Unless => write!(f, "UNLESS"),
        }
    }
}

/// Execution node combining two child result groups by label-subset
/// matching.
///
/// The join key of a range vector is the projection of its label map picked
/// by the node's `on` clause, or everything except the `ignoring` clause and
/// the metric name when `on` is absent.
///
/// Note the deliberate departure from strict set semantics, kept for
/// compatibility with the store's established query behaviour: an `AND`
/// whose rhs derives an empty key set passes every lhs vector through
/// unchanged instead of returning nothing.
#[derive(Debug)]
pub struct SetOperatorExec {
    lhs: Vec<Arc<dyn ExecPlan>>,
    rhs: Vec<Arc<dyn ExecPlan>>,
    operator: SetOperator,
    on: Vec<String>,
    ignoring: Vec<String>,
}

impl SetOperatorExec {
    /// Build a set-operator node.
    ///
    /// Fails with [`Error::InvalidJoin`] when both `on` and `ignoring` are
    /// given, or when `on` names the reserved metric-name label; with
    /// [`Error::BadQuery`] when either child group is empty.
    pub fn try_new(
        lhs: Vec<Arc<dyn ExecPlan>>,
        rhs: Vec<Arc<dyn ExecPlan>>,
        operator: SetOperator,
        on: Vec<String>,
        ignoring: Vec<String>,
    ) -> Result<Self> {
        ensure!(
            on.is_empty() || ignoring.is_empty(),
            InvalidJoinSnafu {
                reason: "cannot use both on and ignoring clauses",
            }
        );
        ensure!(
            !on.iter().any(|label| label == METRIC_NAME_LABEL),
            InvalidJoinSnafu {
                reason: format!("cannot use {METRIC_NAME_LABEL} in an on clause"),
            }
        );
        ensure!(
            !lhs.is_empty() && !rhs.is_empty(),
            BadQuerySnafu {
                msg: "set operation requires at least one plan per side",
            }
        );
        Ok(Self {
            lhs,
            rhs,
            operator,
            on,
            ignoring,
        })
    }

    /// Project `labels` down to this node's join key.
    fn join_key(&self, labels: &Labels) -> Labels {
        if !self.on.is_empty() {
            Labels::from_pairs(
                labels
                    .iter()
                    .filter(|&(name, _)| self.on.iter().any(|l| l == name)),
            )
        } else {
            Labels::from_pairs(labels.iter().filter(|&(name, _)| {
                name != METRIC_NAME_LABEL && !self.ignoring.iter().any(|l| l == name)
            }))
        }
    }

    /// Run all children concurrently and compose their responses. Responses
    /// are collected in child order.
    pub async fn execute(&self) -> Result<Vec<RangeVector>> {
        let responses = futures::stream::iter(
            self.lhs
                .iter()
                .chain(self.rhs.iter())
                .map(Arc::clone)
                .enumerate(),
        )
        .map(|(child, plan)| async move {
            match plan.execute().await {
                Ok(rvs) => (ChildResponse::Result(rvs), child),
                Err(e) => (ChildResponse::Error(e), child),
            }
        })
        .buffered(MAX_CONCURRENT_CHILDREN)
        .boxed();

        self.compose(responses).await
    }

    /// Combine tagged child responses into the node's result.
    ///
    /// Indices below `lhs.len()` belong to the left group. A child error
    /// short-circuits the stream; completion requires exactly one response
    /// per child.
    pub async fn compose(
        &self,
        mut responses: BoxStream<'_, (ChildResponse, usize)>,
    ) -> Result<Vec<RangeVector>> {
        let expected = self.lhs.len() + self.rhs.len();
        let mut received = 0;
        let mut lhs_rvs = Vec::new();
        let mut rhs_rvs = Vec::new();

        while let Some((response, child)) = responses.next().await {
            match response {
                ChildResponse::Error(source) => return Err(Error::Child { source }),
                ChildResponse::Result(rvs) => {
                    ensure!(
                        child < expected,
                        BadQuerySnafu {
                            msg: format!("child index {child} out of range for {expected} plans"),
                        }
                    );
                    received += 1;
                    if child < self.lhs.len() {
                        lhs_rvs.extend(rvs);
                    } else {
                        rhs_rvs.extend(rvs);
                    }
                }
            }
        }

        ensure!(
            received == expected,
            InsufficientResponsesSnafu { received, expected }
        );

        let result = match self.operator {
            SetOperator::And => self.set_op_and(lhs_rvs, rhs_rvs),
            SetOperator::Or => self.set_op_or(lhs_rvs, rhs_rvs),
            SetOperator::Unless => self.set_op_unless(lhs_rvs, rhs_rvs),
        };
        debug!(operator = %self.operator, results = result.len(), "composed set operation");
        Ok(result)
    }

    /// Intersection by join key, preserving lhs order.
    ///
    /// A rhs vector with an empty join key never enters the key set, so the
    /// empty key cannot match everything; an empty key set passes all lhs
    /// vectors through (see the type-level note).
    fn set_op_and(&self, lhs_rvs: Vec<RangeVector>, rhs_rvs: Vec<RangeVector>) -> Vec<RangeVector> {
        let mut rhs_keys = HashSet::new();
        for rv in &rhs_rvs {
            let jk = self.join_key(rv.labels());
            if !jk.is_empty() {
                rhs_keys.insert(jk);
            }
        }

        lhs_rvs
            .into_iter()
            .filter(|rv| rhs_keys.contains(&self.join_key(rv.labels())) || rhs_keys.is_empty())
            .collect()
    }

    /// Union: every lhs vector in lhs order, then every rhs vector whose
    /// join key was not derived on the lhs, in rhs order.
    fn set_op_or(&self, lhs_rvs: Vec<RangeVector>, rhs_rvs: Vec<RangeVector>) -> Vec<RangeVector> {
        let lhs_keys: HashSet<Labels> = lhs_rvs
            .iter()
            .map(|rv| self.join_key(rv.labels()))
            .collect();

        let mut result = lhs_rvs;
        result.extend(
            rhs_rvs
                .into_iter()
                .filter(|rv| !lhs_keys.contains(&self.join_key(rv.labels()))),
        );
        result
    }

    /// Difference: every lhs vector whose join key is absent from the rhs
    /// key set, in lhs order.
    fn set_op_unless(
        &self,
        lhs_rvs: Vec<RangeVector>,
        rhs_rvs: Vec<RangeVector>,
    ) -> Vec<RangeVector> {
        let rhs_keys: HashSet<Labels> = rhs_rvs
            .iter()
            .map(|rv| self.join_key(rv.labels()))
            .collect();

        lhs_rvs
            .into_iter()
            .filter(|rv| !rhs_keys.contains(&self.join_key(rv.labels())))
            .collect()
    }
}
