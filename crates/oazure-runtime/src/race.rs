//! First-of-three racing between an operation, a deadline and a cancellation
//! signal.
//!
//! The losers are dropped before [`race`] returns. Dropping an in-flight
//! `reqwest` future aborts the request, so no network call outlives a race
//! that the deadline or the cancellation signal won.
//!
//! When several parties are ready at once the winner is picked in a fixed
//! order: cancellation, then the deadline, then the operation. An already
//! cancelled token or an already elapsed deadline therefore never polls the
//! operation at all.

use std::future::{pending, Future};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Which party settled a [`race`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T> {
    /// The operation finished first
    Completed(T),

    /// The deadline passed before the operation finished
    DeadlineElapsed,

    /// The cancellation signal fired before the operation finished
    Cancelled,
}

impl<T> Settled<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The operation's output, if it won
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Run `operation` until it completes, `deadline` passes or `cancel` fires.
///
/// A `None` deadline or token never wins.
pub async fn race<F>(
    operation: F,
    deadline: Option<Instant>,
    cancel: Option<&CancellationToken>,
) -> Settled<F::Output>
where
    F: Future,
{
    if cancel.is_some_and(|token| token.is_cancelled()) {
        return Settled::Cancelled;
    }
    if deadline.is_some_and(|at| at <= Instant::now()) {
        return Settled::DeadlineElapsed;
    }

    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => pending::<()>().await,
        }
    };
    let deadline_elapsed = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => pending::<()>().await,
        }
    };

    tokio::select! {
        biased;

        _ = cancelled => Settled::Cancelled,
        _ = deadline_elapsed => Settled::DeadlineElapsed,
        output = operation => Settled::Completed(output),
    }
}

#[cfg(test)]
#[path = "race_tests.rs"]
mod tests;
