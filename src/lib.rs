//! MapFlow - A streaming row-mapping and transform execution engine
//!
//! This crate turns a declarative set of column operations (copy, rename,
//! constant, filter, merge-join key, aggregate, function, series, group/ungroup)
//! into executable pipeline stages that consume rows of one schema and
//! produce rows of another, one row or one row-group at a time.

pub mod config;
pub mod core;
pub mod functions;
pub mod mapping;
pub mod transform;
pub mod utils;
