//! Error taxonomy shared across the limitomo workspace.
//!
//! Six failure kinds cover the whole pipeline, from parameter validation
//! through engine resource management. Callers branch on the variant (or on
//! [`CoreError::is_recoverable`]) to decide between retrying, adjusting
//! parameters, and aborting the job.

use thiserror::Error;

/// Result alias using [`CoreError`].
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Unified error type for the limitomo core contracts.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// Bad component or geometry parameters, rejected before any allocation.
    #[error("validation error: {message}")]
    Validation {
        /// What was invalid.
        message: String,
    },

    /// Operation invoked before its required setup completed.
    #[error("precondition not met for {operation}: {message}")]
    Precondition {
        /// The operation that was refused.
        operation: String,
        /// Which setup step is missing.
        message: String,
    },

    /// Result requested before the producing computation ran.
    #[error("result not ready: {message}")]
    NotReady {
        /// Which result was requested.
        message: String,
    },

    /// Fitter failed to reach tolerance within its iteration budget.
    ///
    /// Recoverable: the caller may retry with a different seed, component
    /// count, or looser tolerance.
    #[error(
        "convergence failure after {iterations} iterations \
         (residual {residual:.6e}, tolerance {tolerance:.6e})"
    )]
    Convergence {
        /// Iterations spent before giving up.
        iterations: usize,
        /// Best residual reached.
        residual: f64,
        /// Residual the fit was required to reach.
        tolerance: f64,
    },

    /// Cross-resolution matching under-covered the required components.
    #[error("matching error: {message}")]
    Matching {
        /// Which coverage requirement failed.
        message: String,
    },

    /// Engine or storage resource failure. Always fatal to the owning job;
    /// the owning handle still attempts a full release before this
    /// propagates.
    #[error("resource error during {operation}: {message}")]
    Resource {
        /// The allocation, release, or I/O operation that failed.
        operation: String,
        /// Failure detail.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Precondition {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a not-ready error.
    #[must_use]
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    /// Creates a matching error.
    #[must_use]
    pub fn matching(message: impl Into<String>) -> Self {
        Self::Matching {
            message: message.into(),
        }
    }

    /// Creates a resource error.
    #[must_use]
    pub fn resource(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether retrying with adjusted parameters can succeed.
    ///
    /// Only convergence failures qualify: validation, precondition, and
    /// not-ready errors are contract violations that repeat identically, and
    /// resource errors are fatal to the current job.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Convergence { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = CoreError::validation("weight must be non-negative");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("weight must be non-negative"));
    }

    #[test]
    fn test_precondition_display() {
        let err = CoreError::precondition("reconstruct", "no sinogram set");
        assert!(err.to_string().contains("reconstruct"));
        assert!(err.to_string().contains("no sinogram set"));
    }

    #[test]
    fn test_convergence_display_carries_numbers() {
        let err = CoreError::Convergence {
            iterations: 200,
            residual: 0.5,
            tolerance: 1e-3,
        };
        let text = err.to_string();
        assert!(text.contains("200"));
        assert!(text.contains("5.000000e-1") || text.contains("5.000000e0"));
    }

    #[test]
    fn test_recoverability() {
        assert!(CoreError::Convergence {
            iterations: 1,
            residual: 1.0,
            tolerance: 0.1,
        }
        .is_recoverable());

        assert!(!CoreError::validation("x").is_recoverable());
        assert!(!CoreError::precondition("op", "x").is_recoverable());
        assert!(!CoreError::not_ready("x").is_recoverable());
        assert!(!CoreError::matching("x").is_recoverable());
        assert!(!CoreError::resource("op", "x").is_recoverable());
    }

    #[test]
    fn test_variant_matching() {
        let err = CoreError::resource("allocate volume", "table full");
        assert!(matches!(err, CoreError::Resource { .. }));
    }
}
