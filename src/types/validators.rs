/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`ValidatorSet`] type and its associated methods.

use std::{collections::HashMap, slice};

use rand::seq::SliceRandom;

use super::{
    basic::{Power, TotalPower},
    crypto_primitives::VerifyingKey,
};

/// Identities of validators and their voting powers.
///
/// The validator set maintains the list of validators in ascending order of their [public keys](VerifyingKey),
/// and avails methods: [`ValidatorSet::validators`] and [`ValidatorSet::validators_and_powers`] to get them in
/// this order. Positions in this order are also the positions of validators' signatures in a
/// [`SignatureSet`](super::basic::SignatureSet).
///
/// # Limits to total power
///
/// The total power of a validator set must not exceed `u128::MAX/2`. Sets that exceed it, or that have no
/// power at all, cannot form a quorum, and [`quorum`](ValidatorSet::quorum) reports this as
/// [`QuorumUnreachable`].
#[derive(Clone, Debug, Default)]
pub struct ValidatorSet {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
    powers: HashMap<VerifyingKey, Power>,
}

impl ValidatorSet {
    pub fn new() -> ValidatorSet {
        Self {
            validators: Vec::new(),
            powers: HashMap::new(),
        }
    }

    pub fn put(&mut self, validator: &VerifyingKey, power: Power) {
        if !self.powers.contains_key(validator) {
            let validator_bytes = validator.to_bytes();
            if let Err(insert_pos) = self
                .validators
                .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            {
                self.validators.insert(insert_pos, *validator);
            }
        }

        self.powers.insert(*validator, power);
    }

    pub fn power(&self, validator: &VerifyingKey) -> Option<Power> {
        self.powers.get(validator).copied()
    }

    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for power in self.powers.values() {
            total_power += *power
        }
        total_power
    }

    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.powers.contains_key(validator)
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Get a vector containing each validator and its power, in ascending order of the validators' verifying keys.
    pub fn validators_and_powers(&self) -> Vec<(VerifyingKey, Power)> {
        self.validators()
            .filter_map(|v| self.power(v).map(|power| (*v, power)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self, validator: &VerifyingKey) -> Option<usize> {
        let validator_bytes = validator.to_bytes();
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .ok()
    }

    /// Pick a validator uniformly at random, other than `excluding`. Used to choose a fallback peer to sync from.
    pub(crate) fn random_except(&self, excluding: &[VerifyingKey]) -> Option<VerifyingKey> {
        let candidates: Vec<&VerifyingKey> = self
            .validators
            .iter()
            .filter(|v| !excluding.contains(v))
            .collect();
        candidates.choose(&mut rand::thread_rng()).map(|v| **v)
    }

    /// The minimum total power that a set of signatures must carry to form a quorum: `2/3 * total + 1`.
    pub fn quorum(&self) -> Result<TotalPower, QuorumUnreachable> {
        if self.is_empty() {
            return Err(QuorumUnreachable::EmptyValidatorSet);
        }

        let total_power = self.total_power().int();
        if total_power == 0 {
            return Err(QuorumUnreachable::ZeroTotalPower);
        }

        let doubled = total_power
            .checked_mul(2)
            .ok_or(QuorumUnreachable::TotalPowerOverflow)?;
        Ok(TotalPower::new(doubled / 3 + 1))
    }
}

/// The validator set is misconfigured such that no set of votes can ever reach a quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumUnreachable {
    EmptyValidatorSet,
    ZeroTotalPower,
    TotalPowerOverflow,
}
