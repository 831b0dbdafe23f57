//! Ordered fallback shared by the provider chain and the backend selector.
//!
//! Candidates are tried in priority order, each bounded by a timeout. The
//! first success short-circuits; otherwise every failure is returned, one per
//! candidate, in the order they were tried.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::Attempted;

/// The candidate that answered.
#[derive(Debug, Clone)]
pub struct Answered<T, E> {
    pub index: usize,
    pub name: String,
    pub value: T,
    pub elapsed: Duration,
    /// Failures of the candidates tried before this one, in order.
    pub skipped: Vec<Attempted<E>>,
}

/// Try `candidates` in order until `attempt` succeeds.
///
/// `timed_out` builds the failure recorded when an attempt exceeds `timeout`;
/// a timeout is treated exactly like any other failure.
pub async fn first_success<'a, C, T, E, F, Fut>(
    label: &str,
    candidates: &'a [C],
    timeout: Duration,
    name_of: impl Fn(&C) -> String,
    timed_out: impl Fn(Duration) -> E,
    mut attempt: F,
) -> Result<Answered<T, E>, Vec<Attempted<E>>>
where
    E: std::fmt::Display,
    F: FnMut(&'a C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = Vec::with_capacity(candidates.len());

    for (index, candidate) in candidates.iter().enumerate() {
        let name = name_of(candidate);
        let t0 = Instant::now();
        let result = match tokio::time::timeout(timeout, attempt(candidate)).await {
            Ok(r) => r,
            Err(_) => Err(timed_out(timeout)),
        };

        match result {
            Ok(value) => {
                tracing::debug!(target: "fallback", chain = label, candidate = %name, index, "candidate answered");
                return Ok(Answered {
                    index,
                    name,
                    value,
                    elapsed: t0.elapsed(),
                    skipped: failures,
                });
            }
            Err(failure) => {
                tracing::warn!(target: "fallback", chain = label, candidate = %name, error = %failure, "candidate failed, trying next");
                failures.push(Attempted { name, failure });
            }
        }
    }

    Err(failures)
}
