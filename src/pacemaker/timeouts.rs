/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! How long a view may last before a replica gives up on it.

use std::time::Duration;

use crate::types::basic::View;

/// Policy for the duration of each view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeoutPolicy {
    /// Every view gets the same duration.
    Fixed(Duration),
    /// The duration grows with the number of views since the last commit:
    /// `base * rate ^ min(max_exponent, view - highest_committed_view - 1)`.
    Exponential {
        base: Duration,
        rate: f64,
        max_exponent: u32,
    },
}

impl TimeoutPolicy {
    /// Checks that the policy yields a positive, representable duration for every view.
    pub fn validate(&self) -> Result<(), TimeoutPolicyError> {
        match *self {
            TimeoutPolicy::Fixed(duration) => {
                if duration.is_zero() {
                    return Err(TimeoutPolicyError::ZeroBase);
                }
            }
            TimeoutPolicy::Exponential {
                base,
                rate,
                max_exponent,
            } => {
                if base.is_zero() {
                    return Err(TimeoutPolicyError::ZeroBase);
                }
                if !rate.is_finite() || rate <= 1.0 {
                    return Err(TimeoutPolicyError::RateNotAboveOne { rate });
                }
                let max_secs = base.as_secs_f64() * rate.powi(exponent(max_exponent as u64));
                if Duration::try_from_secs_f64(max_secs).is_err() {
                    return Err(TimeoutPolicyError::MaxTimeoutOverflow);
                }
            }
        }
        Ok(())
    }

    /// The duration of `view`, given the view of the highest committed vertex.
    pub fn timeout(&self, view: View, highest_committed_view: View) -> Duration {
        match *self {
            TimeoutPolicy::Fixed(duration) => duration,
            TimeoutPolicy::Exponential {
                base,
                rate,
                max_exponent,
            } => {
                let uncommitted_views = (view - highest_committed_view).saturating_sub(1);
                let exp = exponent(uncommitted_views.min(max_exponent as u64));
                Duration::try_from_secs_f64(base.as_secs_f64() * rate.powi(exp))
                    .unwrap_or(Duration::MAX)
            }
        }
    }
}

fn exponent(n: u64) -> i32 {
    n.min(i32::MAX as u64) as i32
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutPolicyError {
    ZeroBase,
    RateNotAboveOne { rate: f64 },
    MaxTimeoutOverflow,
}
