use thiserror::Error;

pub use crate::auth::AuthError;
pub use crate::bundle::BundleError;
pub use crate::credentials::ValidationError;
pub use crate::platform::PlatformError;
pub use crate::poller::PollError;

/// Errors that end a wizard run.
///
/// Step failures never surface here directly: they are reported and retried,
/// and only turn into [`WizardError::Aborted`] when the operator declines.
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("Aborted by operator")]
    Aborted,

    #[error("{step} still failing after {attempts} attempts")]
    RetriesExhausted { step: String, attempts: u32 },

    #[error("{0}")]
    Setup(String),

    #[error("operator I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type WizardResult<T> = Result<T, WizardError>;
