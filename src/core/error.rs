//! Error handling for amdagg
//!
//! The error system follows two rules:
//! 1. **Strongly-typed errors** ([`AggregatorError`]) for the library, so that a
//!    single build outcome can be matched on and shared with every waiter of a
//!    cache key.
//! 2. **User-friendly messages** ([`ErrorContext`]) with suggestions for CLI users.
//!
//! Application code (configuration loading, the CLI) works with
//! [`anyhow::Result`] and `.context(...)`. Use [`user_friendly_error`] to turn any
//! [`anyhow::Error`] into something printable.
//!
//! # Examples
//!
//! ```rust,no_run
//! use amdagg::core::{AggregatorError, user_friendly_error};
//!
//! let error = AggregatorError::NoBuilder {
//!     module: "app/logo.png".to_string(),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display(); // colored error with a suggestion
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for aggregator operations.
///
/// Every field is an owned string so the enum is [`Clone`]: the single-flight
/// caches hand the same failed outcome to the builder and all of its waiters.
///
/// # Severity
///
/// - [`ParseFailure`] is logged and never aborts a scan.
/// - [`ProtocolViolation`] is fatal to the request that triggered it.
/// - [`BuildFailure`] is converted into an uncached error artifact.
/// - [`ProviderFailure`] and [`ResourceNotFound`] fail a layer when they hit an
///   explicitly requested module.
///
/// [`ParseFailure`]: AggregatorError::ParseFailure
/// [`ProtocolViolation`]: AggregatorError::ProtocolViolation
/// [`BuildFailure`]: AggregatorError::BuildFailure
/// [`ProviderFailure`]: AggregatorError::ProviderFailure
/// [`ResourceNotFound`]: AggregatorError::ResourceNotFound
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    /// The dependency extractor could not tokenize or parse a resource.
    #[error("Failed to parse '{uri}': {reason}")]
    ParseFailure {
        /// Resource URI
        uri: String,
        /// Lexer or parser message, with line number
        reason: String,
    },

    /// A builder returned a provisional cache key generator from `build`.
    ///
    /// Provisional generators are only legal before a build; the build must
    /// replace them with final ones. Nothing is cached for the offending key.
    #[error(
        "Builder '{builder}' returned a provisional cache key generator for module '{module}'"
    )]
    ProtocolViolation {
        /// Name of the offending builder
        builder: String,
        /// Module being built
        module: String,
    },

    /// A builder failed (returned an error or panicked).
    #[error("Failed to build module '{module}': {reason}")]
    BuildFailure {
        /// Module being built
        module: String,
        /// Failure message
        reason: String,
    },

    /// The resource provider could not read or stat a resource.
    #[error("Failed to access resource '{uri}': {reason}")]
    ProviderFailure {
        /// Resource URI
        uri: String,
        /// Underlying I/O message
        reason: String,
    },

    /// The resource does not exist.
    #[error("Resource '{uri}' not found")]
    ResourceNotFound {
        /// Resource URI
        uri: String,
    },

    /// No registered builder handles the module.
    #[error("No builder handles module '{module}'")]
    NoBuilder {
        /// Module id
        module: String,
    },

    /// Configuration is invalid.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// A dump filter is not a valid regular expression.
    #[error("Invalid filter pattern '{pattern}': {reason}")]
    InvalidFilter {
        /// The rejected pattern
        pattern: String,
        /// Regex compiler message
        reason: String,
    },

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl AggregatorError {
    /// Whether the error must fail the whole request instead of being turned
    /// into an error artifact.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Whether the error means the resource could not be obtained at all.
    #[must_use]
    pub const fn is_resource_error(&self) -> bool {
        matches!(
            self,
            Self::ProviderFailure { .. } | Self::ResourceNotFound { .. } | Self::NoBuilder { .. }
        )
    }
}

/// Result alias for library operations.
pub type AggregatorResult<T> = std::result::Result<T, AggregatorError>;

/// Error wrapper carrying user-facing details and a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: AggregatorError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: AggregatorError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error (printed in green).
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error (printed in yellow).
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`].
///
/// Recognizes [`AggregatorError`] (anywhere in the chain), [`std::io::Error`],
/// [`toml::de::Error`] and [`regex::Error`]; everything else is reported with
/// its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(agg_error) = error.chain().find_map(|e| e.downcast_ref::<AggregatorError>()) {
        return create_error_context(agg_error.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(AggregatorError::ProviderFailure {
                    uri: "unknown".to_string(),
                    reason: io_error.to_string(),
                })
                .with_suggestion("Check file ownership and permissions of the module root")
                .with_details("amdagg needs read access to every module it scans or builds");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(AggregatorError::ResourceNotFound {
                    uri: "unknown".to_string(),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.chain().find_map(|e| e.downcast_ref::<toml::de::Error>()) {
        return ErrorContext::new(AggregatorError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion(
            "Check the TOML syntax of the configuration file. Verify quotes, brackets, and key names",
        );
    }

    if let Some(regex_error) = error.downcast_ref::<regex::Error>() {
        return ErrorContext::new(AggregatorError::InvalidFilter {
            pattern: "unknown".to_string(),
            reason: regex_error.to_string(),
        })
        .with_suggestion("Escape regex metacharacters such as '.', '(' and '[' in the filter");
    }

    // Generic error - include the full error chain
    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(AggregatorError::Other {
        message,
    })
}

fn create_error_context(error: AggregatorError) -> ErrorContext {
    match &error {
        AggregatorError::ParseFailure { .. } => ErrorContext::new(error)
            .with_suggestion("Fix the JavaScript syntax error; the module keeps its previous dependency list until then")
            .with_details("Dependencies are extracted from the syntax tree, so unterminated strings, comments, or unbalanced brackets prevent extraction"),

        AggregatorError::ProtocolViolation { builder, .. } => {
            let suggestion = format!(
                "Builder '{builder}' must return final (non-provisional) cache key generators from build()"
            );
            ErrorContext::new(error)
                .with_suggestion(suggestion)
                .with_details("Provisional generators may only be supplied before a build; caching them would mix builds for different feature sets")
        }

        AggregatorError::BuildFailure { .. } => ErrorContext::new(error)
            .with_suggestion("Run with --verbose to see the builder's log output"),

        AggregatorError::ProviderFailure { uri, .. } | AggregatorError::ResourceNotFound { uri } => {
            let suggestion = format!("Check that '{uri}' exists below the configured root");
            ErrorContext::new(error).with_suggestion(suggestion)
        }

        AggregatorError::NoBuilder { .. } => ErrorContext::new(error)
            .with_suggestion("Add a [[builders]] entry whose extensions include this module's file extension"),

        AggregatorError::ConfigError { .. } => ErrorContext::new(error)
            .with_suggestion("Check the configuration file (default: ~/.amdagg/config.toml)"),

        AggregatorError::InvalidFilter { .. } => ErrorContext::new(error)
            .with_suggestion("Escape regex metacharacters such as '.', '(' and '[' in the filter"),

        AggregatorError::Other { .. } => ErrorContext::new(error),
    }
}
