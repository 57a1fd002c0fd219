/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::collections::{BTreeMap, HashSet};

use crate::types::{
    basic::{TotalPower, View},
    crypto_primitives::VerifyingKey,
    validators::{QuorumUnreachable, ValidatorSet},
};

/// Collects [`NewView`](crate::messages::NewView) messages per view, on behalf of the leader of that view.
pub struct PendingNewViews {
    validator_set: ValidatorSet,
    quorum: TotalPower,
    collected: BTreeMap<View, NewViewCollector>,
}

#[derive(Default)]
struct NewViewCollector {
    collected_from: HashSet<VerifyingKey>,
    accumulated_power: TotalPower,
    quorum_reported: bool,
}

impl PendingNewViews {
    pub fn new(validator_set: ValidatorSet) -> Result<PendingNewViews, QuorumUnreachable> {
        let quorum = validator_set.quorum()?;
        Ok(PendingNewViews {
            validator_set,
            quorum,
            collected: BTreeMap::new(),
        })
    }

    /// Notes that a new view message for `view` was received from `sender`. Returns `true` exactly once per
    /// view, on the message that brings the senders' power to a quorum. Senders outside the validator set are
    /// ignored.
    pub fn collect(&mut self, view: View, sender: &VerifyingKey) -> bool {
        let power = match self.validator_set.power(sender) {
            Some(power) => power,
            None => return false,
        };

        let collector = self.collected.entry(view).or_default();
        if collector.quorum_reported || !collector.collected_from.insert(*sender) {
            return false;
        }
        collector.accumulated_power += power;

        if collector.accumulated_power >= self.quorum {
            collector.quorum_reported = true;
            true
        } else {
            false
        }
    }

    /// Discard the collectors of every view below `view`.
    pub fn update_view(&mut self, view: View) {
        self.collected = self.collected.split_off(&view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{basic::Power, crypto_primitives::SigningKey};
    use rand_core::OsRng;

    #[test]
    fn quorum_is_reported_once() {
        let mut csprg = OsRng {};
        let keys: Vec<VerifyingKey> = (0..4)
            .map(|_| SigningKey::generate(&mut csprg).verifying_key())
            .collect();
        let mut validator_set = ValidatorSet::new();
        for key in &keys {
            validator_set.put(key, Power::new(1));
        }
        let mut new_views = PendingNewViews::new(validator_set).unwrap();
        let view = View::new(3);

        assert!(!new_views.collect(view, &keys[0]));
        assert!(!new_views.collect(view, &keys[0]));
        assert!(!new_views.collect(view, &keys[1]));
        assert!(new_views.collect(view, &keys[2]));
        assert!(!new_views.collect(view, &keys[3]));

        let outsider = SigningKey::generate(&mut csprg).verifying_key();
        assert!(!new_views.collect(View::new(4), &outsider));
    }
}
