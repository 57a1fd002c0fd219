/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of view progression.
//!
//! Main type: [`Pacemaker`].

use std::time::{Duration, Instant};

use crate::types::{basic::View, certificates::QuorumCertificate};

use super::timeouts::{TimeoutPolicy, TimeoutPolicyError};

/// Tracks the current view and its deadline.
///
/// # Usage
///
/// The caller drives the `Pacemaker` through two methods, each of which returns the new view if the call
/// caused a view change:
/// 1. [`process_qc`](Self::process_qc): whenever a QC is obtained, whether received or formed locally.
/// 2. [`process_local_timeout`](Self::process_local_timeout): whenever the caller observes that
///    [`deadline`](Self::deadline) has passed.
///
/// A view is only ever left through one of these two methods, and views never decrease.
pub struct Pacemaker {
    current_view: View,
    highest_committed_view: View,
    timeout_policy: TimeoutPolicy,
    deadline: Instant,
}

impl Pacemaker {
    /// Create a `Pacemaker` that starts in `init_view`.
    pub fn new(
        timeout_policy: TimeoutPolicy,
        init_view: View,
        highest_committed_view: View,
        now: Instant,
    ) -> Result<Self, PacemakerError> {
        timeout_policy.validate()?;
        let deadline = now + timeout_policy.timeout(init_view, highest_committed_view);
        Ok(Self {
            current_view: init_view,
            highest_committed_view,
            timeout_policy,
            deadline,
        })
    }

    pub fn current_view(&self) -> View {
        self.current_view
    }

    /// The instant at which the current view times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// The duration that `view` would get if it were entered now.
    pub fn timeout(&self, view: View) -> Duration {
        self.timeout_policy
            .timeout(view, self.highest_committed_view)
    }

    /// Move to the view after `qc.voted_view` if that is ahead of the current view.
    pub fn process_qc(&mut self, qc: &QuorumCertificate, now: Instant) -> Option<View> {
        if qc.voted_view >= self.current_view {
            Some(self.enter(qc.voted_view.next(), now))
        } else {
            None
        }
    }

    /// Move past `view` without a QC. A timeout for any view other than the current one is ignored.
    pub fn process_local_timeout(&mut self, view: View, now: Instant) -> Option<View> {
        if view == self.current_view {
            Some(self.enter(view.next(), now))
        } else {
            None
        }
    }

    /// Record a commit, which shortens the timeouts of later views under an exponential policy.
    pub fn update_highest_committed_view(&mut self, view: View) {
        if view > self.highest_committed_view {
            self.highest_committed_view = view;
        }
    }

    fn enter(&mut self, view: View, now: Instant) -> View {
        self.current_view = view;
        self.deadline = now + self.timeout(view);
        log::debug!("Entered view {}, timeout in {:?}", view, self.deadline - now);
        view
    }
}

/// Enumerates the different ways that a [`Pacemaker`] cannot be constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum PacemakerError {
    /// See: [`TimeoutPolicyError`].
    InvalidTimeoutPolicy(TimeoutPolicyError),
}

impl From<TimeoutPolicyError> for PacemakerError {
    fn from(value: TimeoutPolicyError) -> Self {
        PacemakerError::InvalidTimeoutPolicy(value)
    }
}
