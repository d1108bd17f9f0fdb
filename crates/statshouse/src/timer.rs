// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::time::Instant;

/// Lazily armed one-shot deadline. Arming an armed deadline is a no-op, so
/// the first pending work decides when it fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Arms the deadline unless it already is. Returns whether it was armed now.
    pub fn arm(&mut self, at: Instant) -> bool {
        if self.at.is_some() {
            return false;
        }
        self.at = Some(at);
        true
    }

    pub fn disarm(&mut self) {
        self.at = None;
    }

    #[must_use]
    pub fn at(&self) -> Option<Instant> {
        self.at
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.at.is_some_and(|at| at <= now)
    }
}

#[must_use]
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Sleeps until `deadline`, or forever when there is none.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
