//! Shared bounded generate→validate→feedback→retry combinator, used by both
//! the Red-Flag Guard and the Linter Loop (§9 Design Notes).

use crate::error::MakerResult;
use std::future::Future;

/// The outcome of one validation pass.
pub enum ValidationOutcome<V> {
    Accepted,
    /// Rejected with feedback to fold into the next generation attempt,
    /// plus whatever validation artifacts (red flags, diagnostics) were
    /// produced, for the caller to record on the step's trace.
    Rejected { feedback: String, artifacts: V },
}

/// Runs `generate` then `validate` up to `max_attempts` times, folding
/// rejection feedback into the next `generate` call via `with_feedback`.
/// Returns the last accepted output, or `Err` carrying the final rejection
/// artifacts if the budget is exhausted.
pub async fn bounded_retry<T, V, GenFut, ValFut>(
    max_attempts: u32,
    mut generate: impl FnMut(Option<&str>) -> GenFut,
    mut validate: impl FnMut(&T) -> ValFut,
) -> MakerResult<Result<T, (T, V)>>
where
    GenFut: Future<Output = MakerResult<T>>,
    ValFut: Future<Output = MakerResult<ValidationOutcome<V>>>,
{
    let mut feedback: Option<String> = None;
    let mut last: Option<(T, V)> = None;

    for _attempt in 0..max_attempts {
        let output = generate(feedback.as_deref()).await?;
        match validate(&output).await? {
            ValidationOutcome::Accepted => return Ok(Ok(output)),
            ValidationOutcome::Rejected { feedback: fb, artifacts } => {
                feedback = Some(fb);
                last = Some((output, artifacts));
            }
        }
    }

    match last {
        Some(rejected) => Ok(Err(rejected)),
        None => unreachable!("max_attempts must be >= 1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn accepts_on_first_valid_attempt() {
        let result = bounded_retry(
            3,
            |_feedback| async { Ok::<_, crate::error::MakerError>(42) },
            |_output| async { Ok::<_, crate::error::MakerError>(ValidationOutcome::Accepted::<()>) },
        )
        .await
        .unwrap();
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_rejection() {
        let calls = AtomicU32::new(0);
        let result = bounded_retry(
            2,
            |_feedback| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, crate::error::MakerError>(1) }
            },
            |_output| async {
                Ok::<_, crate::error::MakerError>(ValidationOutcome::Rejected {
                    feedback: "nope".to_string(),
                    artifacts: vec!["flag".to_string()],
                })
            },
        )
        .await
        .unwrap();

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
