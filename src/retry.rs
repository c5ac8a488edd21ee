//! Retry policy applied to every external call the wizard makes.

use crate::error::{WizardError, WizardResult};
use crate::operator::Operator;
use std::fmt::Display;
use std::future::Future;

pub const RETRY_PROMPT: &str = "Would you like to try again?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Ask the operator after every failure; "n" aborts the whole run.
    #[default]
    Confirm,
    /// Retry without asking, up to this many attempts in total.
    MaxAttempts(u32),
}

impl RetryPolicy {
    /// Run `step` until it succeeds or the policy gives up.
    ///
    /// Each failure is shown to the operator as `failure` followed by the
    /// underlying error.
    pub async fn run<T, E, F, Fut>(
        &self,
        operator: &mut dyn Operator,
        failure: &str,
        mut step: F,
    ) -> WizardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let error = match step().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            tracing::debug!(step = failure, attempt = attempts, %error, "step failed");
            operator.failure(failure);
            operator.info(&error.to_string());

            match *self {
                RetryPolicy::Confirm => {
                    if !operator.confirm(RETRY_PROMPT)? {
                        return Err(WizardError::Aborted);
                    }
                }
                RetryPolicy::MaxAttempts(max) if attempts >= max => {
                    return Err(WizardError::RetriesExhausted {
                        step: failure.to_string(),
                        attempts,
                    });
                }
                RetryPolicy::MaxAttempts(_) => {}
            }
        }
    }
}
