//! Tagged result returned by handlers.
//!
//! Expected failure modes are values, not unwinding: a handler either
//! produces its value, reports the caller's validation failures, or ends
//! the invocation with a [`CoreError`] (which includes early exits).

use crate::errors::{CoreError, FieldError};

/// Result of one unit of handler work.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation succeeded.
    Ok(T),
    /// Caller-supplied data failed validation.
    ValidationFailure(Vec<FieldError>),
    /// The operation ended with an error (early exit or fault).
    Fatal(CoreError),
}

impl<T> Outcome<T> {
    /// Whether this is [`Outcome::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Map the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::ValidationFailure(errors) => Outcome::ValidationFailure(errors),
            Self::Fatal(err) => Outcome::Fatal(err),
        }
    }

    /// Convert into a plain `Result`, folding validation failures into
    /// [`CoreError::Validation`].
    pub fn into_result(self) -> Result<T, CoreError> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::ValidationFailure(errors) => Err(CoreError::Validation(errors)),
            Self::Fatal(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, CoreError>> for Outcome<T> {
    fn from(result: Result<T, CoreError>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(CoreError::Validation(errors)) => Self::ValidationFailure(errors),
            Err(err) => Self::Fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::Value;

    #[test]
    fn from_ok_result() {
        let outcome: Outcome<u8> = Ok(3).into();
        assert_matches!(outcome, Outcome::Ok(3));
    }

    #[test]
    fn validation_error_becomes_validation_failure() {
        let errors = vec![FieldError::new("/x", "bad", Value::Null)];
        let outcome: Outcome<()> = Err(CoreError::Validation(errors)).into();
        assert_matches!(outcome, Outcome::ValidationFailure(e) if e.len() == 1);
    }

    #[test]
    fn early_exit_stays_fatal() {
        let outcome: Outcome<()> = Err(CoreError::early_exit(409, None)).into();
        assert_matches!(
            outcome,
            Outcome::Fatal(CoreError::EarlyExit {
                status_code: 409,
                ..
            })
        );
    }

    #[test]
    fn into_result_roundtrips_validation() {
        let outcome: Outcome<()> = Outcome::ValidationFailure(vec![]);
        assert_matches!(outcome.into_result(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn map_transforms_only_ok() {
        assert_matches!(Outcome::Ok(2).map(|v| v * 2), Outcome::Ok(4));
        let failed: Outcome<i32> = Outcome::Fatal(CoreError::internal("x"));
        assert!(!failed.map(|v| v * 2).is_ok());
    }
}
