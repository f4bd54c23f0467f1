// src/dag/mod.rs

//! Attack dependency graphs.
//!
//! - [`graph`] holds the adjacency view of one campaign's attack list.
//! - [`validator`] decides whether that list is acyclic and reports the
//!   first cycle it finds.

pub mod graph;
pub mod validator;

pub use graph::DependencyGraph;
pub use validator::{validate_attacks, validate_dependencies, GraphValidation};
