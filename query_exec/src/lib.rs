//! Per-query set-operator execution over range vectors.
//!
//! A [`SetOperatorExec`] node consumes the responses of two child plan
//! groups and combines them by label-subset matching, implementing the
//! `AND`, `OR` and `UNLESS` operations.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

pub mod plan;
pub mod set_op;

pub use plan::{ChildResponse, ExecPlan, QueryError, RangeVector, Sample};
pub use set_op::{Error, Result, SetOperator, SetOperatorExec, METRIC_NAME_LABEL};
