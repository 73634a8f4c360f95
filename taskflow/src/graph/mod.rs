//! Graph model: task specifications and validated DAGs.
//!
//! This module provides:
//! - [`TaskSpec`], an immutable task definition
//! - [`GraphBuilder`], which validates ids, references and acyclicity
//! - [`TaskGraph`], the immutable result with forward/reverse edges and
//!   topological layers

mod builder;
mod dag;
mod task;

pub use builder::GraphBuilder;
pub use dag::TaskGraph;
pub use task::TaskSpec;
