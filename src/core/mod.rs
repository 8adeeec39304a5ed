//! Core types for amdagg
//!
//! Houses the error taxonomy shared by every layer of the aggregator:
//! - [`AggregatorError`] - strongly-typed, cloneable library errors
//! - [`ErrorContext`] - user-facing wrapper with details and suggestions
//! - [`user_friendly_error`] - converts any [`anyhow::Error`] for CLI display

pub mod error;

pub use error::{AggregatorError, AggregatorResult, ErrorContext, user_friendly_error};
