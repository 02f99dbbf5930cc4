//! Result and error types for Mirar.

use thiserror::Error;

/// Result type for Mirar operations
pub type MirarResult<T> = Result<T, MirarError>;

/// Errors that can occur while driving a test case.
///
/// Every variant is fatal to the current test body: it halts the body,
/// the session still closes, and the error becomes the test's failure reason.
#[derive(Debug, Error)]
pub enum MirarError {
    /// A CSS locator matched no element
    #[error("{action}: no element matches `{selector}`")]
    NotFound {
        /// Action or query that performed the lookup
        action: String,
        /// Selector that matched nothing
        selector: String,
    },

    /// A locator matched more elements than the action accepts
    #[error("{action}: `{selector}` matched {count} elements, pass `multiple: true` to act on all of them")]
    AmbiguousTarget {
        /// Action name
        action: String,
        /// Selector that matched
        selector: String,
        /// Number of matched elements
        count: usize,
    },

    /// Target did not become actionable within the timeout
    #[error("{action}: `{selector}` is not actionable after {timeout_ms}ms ({reason})")]
    Actionability {
        /// Action name
        action: String,
        /// Selector of the target
        selector: String,
        /// Last observed reason (hidden, disabled, detached, covered)
        reason: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Target cannot hold a value
    #[error("{action}: `{selector}` is not editable")]
    NotEditable {
        /// Action name
        action: String,
        /// Selector of the target
        selector: String,
    },

    /// Target is not inside a form
    #[error("submit: `{selector}` is not a form and has no enclosing form")]
    NoForm {
        /// Selector of the target
        selector: String,
    },

    /// Predicate did not hold
    #[error("expected `{selector}` {predicate} {expected:?}, but got {actual:?}")]
    Assertion {
        /// Predicate description (e.g. "to have value")
        predicate: String,
        /// Selector of the asserted element
        selector: String,
        /// Expected value
        expected: String,
        /// Observed value
        actual: String,
    },

    /// Checkpoint tag already used in this session
    #[error("checkpoint tag {tag:?} was already captured in session {session:?}")]
    DuplicateTag {
        /// Duplicated tag
        tag: String,
        /// Owning session (test name)
        session: String,
    },

    /// Session opened while another is live
    #[error("cannot open session {requested:?} while the controller is {state}")]
    SessionReuse {
        /// Test name of the rejected open
        requested: String,
        /// Current controller state
        state: String,
    },

    /// Session closed while none is open
    #[error("no open session to close (controller is {state})")]
    NotOpen {
        /// Current controller state
        state: String,
    },

    /// Unrecognised `{token}` in typed text
    #[error("type: unknown special key {token:?}")]
    UnknownKey {
        /// Offending token, including braces
        token: String,
    },

    /// Locator used where it has no meaning (e.g. CSS as a click position)
    #[error("invalid locator `{locator}`: {message}")]
    InvalidLocator {
        /// Offending locator
        locator: String,
        /// Error message
        message: String,
    },

    /// Checkpoint description cannot be captured
    #[error("checkpoint {tag:?}: {message}")]
    InvalidCheckpoint {
        /// Checkpoint tag
        tag: String,
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Driver-level failure (browser connection, script evaluation, ...)
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// Image comparison error
    #[error("Image comparison failed: {message}")]
    ImageComparison {
        /// Error message
        message: String,
    },

    /// Test body panicked or was cancelled
    #[error("test aborted: {message}")]
    Aborted {
        /// Panic payload or cancellation reason
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl MirarError {
    /// Create a driver error from any displayable cause
    pub fn driver(message: impl std::fmt::Display) -> Self {
        Self::Driver {
            message: message.to_string(),
        }
    }

    /// Short machine-friendly name of the error kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFoundError",
            Self::AmbiguousTarget { .. } => "AmbiguousTargetError",
            Self::Actionability { .. } => "ActionabilityError",
            Self::NotEditable { .. } => "NotEditableError",
            Self::NoForm { .. } => "NoFormError",
            Self::Assertion { .. } => "AssertionError",
            Self::DuplicateTag { .. } => "DuplicateTagError",
            Self::SessionReuse { .. } => "SessionReuseError",
            Self::NotOpen { .. } => "NotOpenError",
            Self::UnknownKey { .. } => "UnknownKeyError",
            Self::InvalidLocator { .. } => "InvalidLocatorError",
            Self::InvalidCheckpoint { .. } => "InvalidCheckpointError",
            Self::Navigation { .. } => "NavigationError",
            Self::Driver { .. } => "DriverError",
            Self::Screenshot { .. } => "ScreenshotError",
            Self::ImageComparison { .. } => "ImageComparisonError",
            Self::Aborted { .. } => "AbortedError",
            Self::Config { .. } => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Yaml(_) => "YamlError",
        }
    }
}
