/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deterministic, stake-weighted leader selection.

use crate::types::{
    basic::View,
    crypto_primitives::VerifyingKey,
    validators::{QuorumUnreachable, ValidatorSet},
};

/// Maps every view to a leader using [Interleaved WRR](https://en.wikipedia.org/wiki/Weighted_round_robin#Interleaved_WRR).
///
/// Conceptually, the leader sequence is an array of length `total_power` built by looping over thresholds
/// `1..=max_power` and, for each threshold, appending every validator (in ascending key order) whose power is
/// at least the threshold. The leader of `view` is the entry at `view % total_power`. Each validator
/// therefore leads a number of views proportional to its power in every window of `total_power` views.
///
/// Thresholds between two consecutive distinct powers select the same validators, so the array is stored as
/// one segment per distinct power instead of one entry per unit of power.
#[derive(Clone, Debug)]
pub struct ProposerElection {
    total_power: u64,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug)]
struct Segment {
    // Number of thresholds covered by the segment.
    thresholds: u64,
    // Validators whose power reaches every threshold in the segment, in ascending key order.
    eligible: Vec<VerifyingKey>,
}

impl ProposerElection {
    pub fn new(validator_set: &ValidatorSet) -> Result<ProposerElection, QuorumUnreachable> {
        validator_set.quorum()?;

        let validators_and_powers = validator_set.validators_and_powers();
        let mut levels: Vec<u64> = validators_and_powers
            .iter()
            .map(|(_, power)| power.int())
            .filter(|power| *power > 0)
            .collect();
        levels.sort_unstable();
        levels.dedup();

        let mut total_power: u64 = 0;
        let mut segments = Vec::with_capacity(levels.len());
        let mut previous_level = 0;
        for level in levels {
            let eligible: Vec<VerifyingKey> = validators_and_powers
                .iter()
                .filter(|(_, power)| power.int() >= level)
                .map(|(validator, _)| *validator)
                .collect();
            let thresholds = level - previous_level;
            let length = thresholds
                .checked_mul(eligible.len() as u64)
                .and_then(|length| total_power.checked_add(length))
                .ok_or(QuorumUnreachable::TotalPowerOverflow)?;
            total_power = length;
            segments.push(Segment {
                thresholds,
                eligible,
            });
            previous_level = level;
        }

        Ok(ProposerElection {
            total_power,
            segments,
        })
    }

    /// The leader of `view`.
    pub fn leader(&self, view: View) -> VerifyingKey {
        let mut index = view.int() % self.total_power;
        for segment in &self.segments {
            let length = segment.thresholds * segment.eligible.len() as u64;
            if index < length {
                return segment.eligible[(index % segment.eligible.len() as u64) as usize];
            }
            index -= length;
        }

        // `total_power` is the sum of the segment lengths, and `new` guarantees that it is non-zero.
        unreachable!("view index {} outside of the leader sequence", index)
    }
}
