//! Validators and the weighted round-robin proposer selection.
//!
//! A [`ValidatorSet`] is an address-ordered sequence of validators, each
//! carrying a voting power and a signed proposer-priority accumulator.
//! Proposer selection walks the priorities: every round each validator
//! gains its voting power, the validator with the highest priority
//! proposes and pays the total voting power back. Over `total_power`
//! rounds every validator proposes `voting_power` times, within an
//! `n - 1` absolute error.
//!
//! Priorities are kept inside a bounded window: before each increment the
//! set is rescaled so `max - min <= 2 * total_power` and centered so the
//! average is zero. Both operations are idempotent within a step, so all
//! arithmetic fits signed 64-bit integers as long as the total voting
//! power stays below [`MAX_TOTAL_VOTING_POWER`].

use crate::crypto::{Address, PublicKey};
use crate::hash::Hash;
use crate::merkle::merkle_root;
use sbor::prelude::*;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Upper bound on the sum of voting powers in a set, chosen so that
/// priority arithmetic (which adds and subtracts multiples of the total)
/// cannot overflow a signed 64-bit integer.
pub const MAX_TOTAL_VOTING_POWER: i64 = (1 << 60) - 1;

/// Priorities are rescaled whenever their spread exceeds this factor
/// times the total voting power.
pub const PRIORITY_WINDOW_SIZE_FACTOR: i64 = 2;

/// A single voting-weighted consensus participant.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Validator {
    pub address: Address,
    pub pub_key: PublicKey,
    pub voting_power: i64,
    pub proposer_priority: i64,
}

impl Validator {
    /// Create a validator with zero initial priority. The address is
    /// derived from the public key.
    pub fn new(pub_key: PublicKey, voting_power: i64) -> Self {
        Validator {
            address: pub_key.address(),
            pub_key,
            voting_power,
            proposer_priority: 0,
        }
    }

    /// Compare two validators by proposer priority, breaking ties toward
    /// the smaller address. `Greater` means `self` wins the round.
    pub fn compare_proposer_priority(&self, other: &Validator) -> Ordering {
        match self.proposer_priority.cmp(&other.proposer_priority) {
            Ordering::Equal => other.address.cmp(&self.address),
            ord => ord,
        }
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Validator{{{} power: {} priority: {}}}",
            self.address, self.voting_power, self.proposer_priority
        )
    }
}

/// Leaf form fed into the validator-set hash: the fields every replica
/// must agree on, excluding the rotating proposer priority.
#[derive(BasicSbor)]
struct SimpleValidator {
    pub_key: PublicKey,
    voting_power: i64,
}

/// An ordered set of validators with cached total voting power and the
/// current proposer.
///
/// Sets are immutable after publication: mutating operations either take
/// `&mut self` before the set is shared, or return a new set
/// ([`ValidatorSet::copy_increment_proposer_priority`]).
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    proposer: Option<Address>,
    total_voting_power: i64,
}

impl ValidatorSet {
    /// Build a set from the given validators.
    ///
    /// Initial priorities are assigned through the same change-set
    /// pipeline used for live updates, then one increment seats the first
    /// proposer. An empty list yields an empty set (a chain may start
    /// without validators and receive them from the application at
    /// genesis).
    pub fn new(validators: Vec<Validator>) -> Result<Self, ValidatorSetError> {
        let mut set = ValidatorSet {
            validators: Vec::new(),
            proposer: None,
            total_voting_power: 0,
        };
        if !validators.is_empty() {
            set.update_with_change_set(&validators)?;
            set.increment_proposer_priority(1);
        }
        Ok(set)
    }

    /// An empty set.
    pub fn empty() -> Self {
        ValidatorSet {
            validators: Vec::new(),
            proposer: None,
            total_voting_power: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    /// Look up a validator by address. Returns its index and a reference.
    pub fn get_by_address(&self, address: &Address) -> Option<(usize, &Validator)> {
        self.validators
            .binary_search_by(|v| v.address.cmp(address))
            .ok()
            .map(|i| (i, &self.validators[i]))
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn has_address(&self, address: &Address) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Sum of all voting powers. Cached; maintained by every mutation.
    pub fn total_voting_power(&self) -> i64 {
        self.total_voting_power
    }

    /// The validator that proposes the next round: the one with the
    /// highest priority, ties broken toward the smaller address.
    pub fn proposer(&self) -> Option<&Validator> {
        if self.validators.is_empty() {
            return None;
        }
        match &self.proposer {
            Some(addr) => self.get_by_address(addr).map(|(_, v)| v),
            None => self.find_proposer(),
        }
    }

    fn find_proposer(&self) -> Option<&Validator> {
        self.validators
            .iter()
            .reduce(|best, v| match v.compare_proposer_priority(best) {
                Ordering::Greater => v,
                _ => best,
            })
    }

    /// Advance the proposer selection by `times` rounds.
    ///
    /// Rescales and centers the priorities once, then applies `times`
    /// increment rounds (add power, pick the maximum, subtract the total
    /// from the winner).
    ///
    /// # Panics
    ///
    /// Panics on an empty set or `times < 1`; both indicate a caller bug.
    pub fn increment_proposer_priority(&mut self, times: i32) {
        assert!(!self.validators.is_empty(), "empty validator set");
        assert!(times > 0, "cannot increment proposer priority zero or negative times");

        let diff_max = PRIORITY_WINDOW_SIZE_FACTOR * self.total_voting_power;
        self.rescale_priorities(diff_max);
        self.shift_by_avg_proposer_priority();

        let mut proposer = None;
        for _ in 0..times {
            proposer = Some(self.increment_once());
        }
        self.proposer = proposer;
    }

    /// Non-mutating variant of [`Self::increment_proposer_priority`].
    pub fn copy_increment_proposer_priority(&self, times: i32) -> Self {
        let mut copy = self.clone();
        copy.increment_proposer_priority(times);
        copy
    }

    /// One increment round. Returns the chosen proposer's address.
    fn increment_once(&mut self) -> Address {
        for val in &mut self.validators {
            val.proposer_priority = safe_add_clip(val.proposer_priority, val.voting_power);
        }
        let total = self.total_voting_power;
        let mostest = self
            .validators
            .iter_mut()
            .reduce(|best, v| match v.compare_proposer_priority(best) {
                Ordering::Greater => v,
                _ => best,
            })
            .expect("non-empty set");
        mostest.proposer_priority = safe_sub_clip(mostest.proposer_priority, total);
        mostest.address
    }

    /// Cap the priority spread at `diff_max` by dividing every priority by
    /// the ceiling of `spread / diff_max`. Idempotent.
    pub fn rescale_priorities(&mut self, diff_max: i64) {
        if self.validators.is_empty() || diff_max <= 0 {
            return;
        }
        let max = self
            .validators
            .iter()
            .map(|v| v.proposer_priority)
            .max()
            .expect("non-empty set");
        let min = self
            .validators
            .iter()
            .map(|v| v.proposer_priority)
            .min()
            .expect("non-empty set");
        // The spread of two arbitrary i64 values can exceed i64::MAX.
        let diff = max as i128 - min as i128;
        let diff_max = diff_max as i128;
        if diff > diff_max {
            let ratio = (diff + diff_max - 1) / diff_max;
            for val in &mut self.validators {
                val.proposer_priority = (val.proposer_priority as i128 / ratio) as i64;
            }
        }
    }

    /// Center the priorities around zero by subtracting their average
    /// (floor division, matching arbitrary-precision semantics).
    fn shift_by_avg_proposer_priority(&mut self) {
        if self.validators.is_empty() {
            return;
        }
        let avg = self.compute_avg_proposer_priority();
        for val in &mut self.validators {
            val.proposer_priority = safe_sub_clip(val.proposer_priority, avg);
        }
    }

    fn compute_avg_proposer_priority(&self) -> i64 {
        let n = self.validators.len() as i128;
        let sum: i128 = self
            .validators
            .iter()
            .map(|v| v.proposer_priority as i128)
            .sum();
        let avg = sum.div_euclid(n);
        // |sum| <= n * i64::MAX, so the average always fits.
        avg as i64
    }

    /// Apply a change set: `power > 0` adds or updates, `power == 0`
    /// removes. Fails without modifying the set if the changes contain
    /// duplicates or negative powers, remove absent validators, overflow
    /// [`MAX_TOTAL_VOTING_POWER`], or would leave the set empty.
    pub fn update_with_change_set(
        &mut self,
        changes: &[Validator],
    ) -> Result<(), ValidatorSetError> {
        if changes.is_empty() {
            return Ok(());
        }
        let (mut updates, removals) = process_changes(changes)?;

        // Updates and removals are disjoint, so if the removals cover the
        // whole set only brand-new validators can keep it non-empty.
        let num_new = updates
            .iter()
            .filter(|u| !self.has_address(&u.address))
            .count();
        if num_new == 0 && removals.len() == self.validators.len() {
            return Err(ValidatorSetError::EmptySet);
        }

        let removed_power = self.verify_removals(&removals)?;
        let new_total = self.verify_updates(&updates, removed_power)?;

        self.compute_new_priorities(&mut updates, new_total);
        self.apply_updates(updates);
        self.apply_removals(&removals);
        self.update_total_voting_power();

        // Keep the priority window bounded after membership changes.
        self.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR * self.total_voting_power);
        self.shift_by_avg_proposer_priority();
        Ok(())
    }

    /// Check the removals all refer to existing validators and return the
    /// voting power they carry away.
    fn verify_removals(&self, removals: &[Address]) -> Result<i64, ValidatorSetError> {
        let mut removed_power: i64 = 0;
        for addr in removals {
            match self.get_by_address(addr) {
                Some((_, val)) => removed_power += val.voting_power,
                None => return Err(ValidatorSetError::RemovalOfNonExistentValidator(*addr)),
            }
        }
        Ok(removed_power)
    }

    /// Check the updates keep the total voting power within bounds.
    /// Returns the total after updates but before removals, which seeds
    /// the priorities of added validators.
    fn verify_updates(
        &self,
        updates: &[Validator],
        removed_power: i64,
    ) -> Result<i64, ValidatorSetError> {
        let mut delta_sum: i128 = 0;
        for upd in updates {
            delta_sum += match self.get_by_address(&upd.address) {
                Some((_, existing)) => upd.voting_power as i128 - existing.voting_power as i128,
                None => upd.voting_power as i128,
            };
        }
        let final_total = self.total_voting_power as i128 - removed_power as i128 + delta_sum;
        if final_total > MAX_TOTAL_VOTING_POWER as i128 {
            return Err(ValidatorSetError::TotalVotingPowerOverflow {
                total: final_total as i64,
                max: MAX_TOTAL_VOTING_POWER,
            });
        }
        Ok((self.total_voting_power as i128 + delta_sum) as i64)
    }

    /// Existing validators keep their accumulated priority; new ones
    /// start at `-(total + total/8)` so a freshly (re-)bonded validator
    /// cannot immediately propose.
    fn compute_new_priorities(&self, updates: &mut [Validator], new_total: i64) {
        for upd in updates.iter_mut() {
            match self.get_by_address(&upd.address) {
                Some((_, existing)) => upd.proposer_priority = existing.proposer_priority,
                None => upd.proposer_priority = -(new_total + (new_total >> 3)),
            }
        }
    }

    /// Merge address-sorted updates into the address-sorted set.
    fn apply_updates(&mut self, updates: Vec<Validator>) {
        let mut merged = Vec::with_capacity(self.validators.len() + updates.len());
        let mut existing = std::mem::take(&mut self.validators).into_iter().peekable();
        let mut updates = updates.into_iter().peekable();

        loop {
            match (existing.peek(), updates.peek()) {
                (Some(e), Some(u)) => match e.address.cmp(&u.address) {
                    Ordering::Less => merged.push(existing.next().expect("peeked")),
                    Ordering::Greater => merged.push(updates.next().expect("peeked")),
                    Ordering::Equal => {
                        existing.next();
                        merged.push(updates.next().expect("peeked"));
                    }
                },
                (Some(_), None) => merged.push(existing.next().expect("peeked")),
                (None, Some(_)) => merged.push(updates.next().expect("peeked")),
                (None, None) => break,
            }
        }
        self.validators = merged;
    }

    fn apply_removals(&mut self, removals: &[Address]) {
        self.validators.retain(|v| !removals.contains(&v.address));
        if let Some(proposer) = &self.proposer {
            if removals.contains(proposer) {
                self.proposer = None;
            }
        }
    }

    fn update_total_voting_power(&mut self) {
        let total: i128 = self
            .validators
            .iter()
            .map(|v| v.voting_power as i128)
            .sum();
        // verify_updates bounds the total before any mutation lands.
        assert!(
            total <= MAX_TOTAL_VOTING_POWER as i128,
            "total voting power exceeded the maximum after validation"
        );
        self.total_voting_power = total as i64;
    }

    /// Merkle root over the (key, power) pairs in set order. Proposer
    /// priorities are excluded so the hash is stable across rounds.
    pub fn hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self
            .validators
            .iter()
            .map(|v| {
                sbor::basic_encode(&SimpleValidator {
                    pub_key: v.pub_key,
                    voting_power: v.voting_power,
                })
                .expect("validator encoding cannot fail")
            })
            .collect();
        merkle_root(&leaves)
    }

    /// Structural sanity check: address order, uniqueness, positive
    /// powers, proposer membership.
    pub fn validate_basic(&self) -> Result<(), ValidatorSetError> {
        for pair in self.validators.windows(2) {
            if pair[0].address >= pair[1].address {
                return Err(ValidatorSetError::UnsortedValidators);
            }
        }
        for val in &self.validators {
            if val.voting_power <= 0 {
                return Err(ValidatorSetError::NonPositivePower {
                    address: val.address,
                    power: val.voting_power,
                });
            }
        }
        if let Some(addr) = &self.proposer {
            if !self.has_address(addr) {
                return Err(ValidatorSetError::ProposerNotInSet(*addr));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ValidatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ValidatorSet{{n: {}, total_power: {}}}",
            self.validators.len(),
            self.total_voting_power
        )
    }
}

/// Split a change list into address-sorted updates and removals,
/// rejecting duplicates and out-of-range powers.
fn process_changes(
    changes: &[Validator],
) -> Result<(Vec<Validator>, Vec<Address>), ValidatorSetError> {
    let mut sorted = changes.to_vec();
    sorted.sort_by(|a, b| a.address.cmp(&b.address));

    let mut updates = Vec::new();
    let mut removals = Vec::new();
    let mut prev: Option<Address> = None;
    for change in sorted {
        if prev == Some(change.address) {
            return Err(ValidatorSetError::DuplicateAddress(change.address));
        }
        prev = Some(change.address);

        if change.voting_power < 0 {
            return Err(ValidatorSetError::NegativePower {
                address: change.address,
                power: change.voting_power,
            });
        }
        if change.voting_power > MAX_TOTAL_VOTING_POWER {
            return Err(ValidatorSetError::PowerExceedsMaximum {
                address: change.address,
                power: change.voting_power,
                max: MAX_TOTAL_VOTING_POWER,
            });
        }
        if change.voting_power == 0 {
            removals.push(change.address);
        } else {
            updates.push(change);
        }
    }
    Ok((updates, removals))
}

fn safe_add_clip(a: i64, b: i64) -> i64 {
    a.saturating_add(b)
}

fn safe_sub_clip(a: i64, b: i64) -> i64 {
    a.saturating_sub(b)
}

/// Errors from validator-set construction and updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorSetError {
    #[error("duplicate validator address in change set: {0}")]
    DuplicateAddress(Address),

    #[error("validator {address} has negative voting power {power}")]
    NegativePower { address: Address, power: i64 },

    #[error("validator {address} voting power {power} exceeds maximum {max}")]
    PowerExceedsMaximum {
        address: Address,
        power: i64,
        max: i64,
    },

    #[error("removal of non-existent validator {0}")]
    RemovalOfNonExistentValidator(Address),

    #[error("applying the changes would leave an empty validator set")]
    EmptySet,

    #[error("total voting power {total} exceeds maximum {max}")]
    TotalVotingPowerOverflow { total: i64, max: i64 },

    #[error("validators are not sorted by address")]
    UnsortedValidators,

    #[error("validator {address} has non-positive voting power {power}")]
    NonPositivePower { address: Address, power: i64 },

    #[error("proposer {0} is not a member of the set")]
    ProposerNotInSet(Address),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn test_key(seed: u8) -> PublicKey {
        PublicKey::Ed25519([seed; 32])
    }

    fn rand_key(rng: &mut ChaCha8Rng) -> PublicKey {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        PublicKey::Ed25519(bytes)
    }

    fn set_with_powers(powers: &[i64]) -> ValidatorSet {
        let vals: Vec<Validator> = powers
            .iter()
            .enumerate()
            .map(|(i, &p)| Validator::new(test_key(i as u8 + 1), p))
            .collect();
        ValidatorSet::new(vals).unwrap()
    }

    #[test]
    fn new_set_is_sorted_and_totaled() {
        let set = set_with_powers(&[5, 10, 1]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.total_voting_power(), 16);
        set.validate_basic().unwrap();
    }

    #[test]
    fn empty_set_is_allowed() {
        let set = ValidatorSet::new(vec![]).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.total_voting_power(), 0);
        assert!(set.proposer().is_none());
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let v = Validator::new(test_key(1), 10);
        let err = ValidatorSet::new(vec![v.clone(), v]).unwrap_err();
        assert!(matches!(err, ValidatorSetError::DuplicateAddress(_)));
    }

    #[test]
    fn negative_power_rejected() {
        let mut v = Validator::new(test_key(1), 10);
        v.voting_power = -1;
        let err = ValidatorSet::new(vec![v]).unwrap_err();
        assert!(matches!(err, ValidatorSetError::NegativePower { .. }));
    }

    #[test]
    fn total_power_overflow_rejected() {
        let a = Validator::new(test_key(1), MAX_TOTAL_VOTING_POWER);
        let b = Validator::new(test_key(2), 1);
        let err = ValidatorSet::new(vec![a, b]).unwrap_err();
        assert!(matches!(
            err,
            ValidatorSetError::TotalVotingPowerOverflow { .. }
        ));
    }

    #[test]
    fn removal_of_absent_validator_rejected() {
        let mut set = set_with_powers(&[10, 20]);
        let mut removal = Validator::new(test_key(9), 0);
        removal.voting_power = 0;
        let err = set.update_with_change_set(&[removal]).unwrap_err();
        assert!(matches!(
            err,
            ValidatorSetError::RemovalOfNonExistentValidator(_)
        ));
    }

    #[test]
    fn emptying_the_set_rejected() {
        let mut set = set_with_powers(&[10]);
        let addr_key = test_key(1);
        let mut removal = Validator::new(addr_key, 0);
        removal.voting_power = 0;
        let err = set.update_with_change_set(&[removal]).unwrap_err();
        assert!(matches!(err, ValidatorSetError::EmptySet));
    }

    /// Over `total_power` rounds each validator proposes `voting_power`
    /// times within an `n - 1` bound.
    fn assert_proposer_frequency(set: &mut ValidatorSet) {
        let n = set.len();
        let total = set.total_voting_power();
        let mut freq = vec![0i64; n];
        for _ in 0..total {
            let proposer = set.proposer().expect("non-empty").address;
            let (idx, _) = set.get_by_address(&proposer).unwrap();
            freq[idx] += 1;
            set.increment_proposer_priority(1);
        }
        let bound = (n as i64 - 1).max(0);
        for (i, &got) in freq.iter().enumerate() {
            let expect = set.get_by_index(i).unwrap().voting_power;
            assert!(
                (got - expect).abs() <= bound,
                "validator {i}: got {got} rounds, expected {expect} (bound {bound})"
            );
        }
    }

    #[test]
    fn proposer_frequency_explicit_cases() {
        let cases: &[&[i64]] = &[
            &[1, 1],
            &[1, 2],
            &[1, 100],
            &[5, 5],
            &[5, 100],
            &[50, 50],
            &[1, 1000],
            &[1, 1, 1],
            &[1, 2, 3],
            &[1, 1, 10],
            &[1, 10, 100],
            &[1, 1, 1, 1],
            &[1, 2, 3, 4],
            &[1, 1, 1, 100],
            &[1, 10, 100, 1000],
        ];
        for powers in cases {
            let mut set = set_with_powers(powers);
            assert_proposer_frequency(&mut set);
        }
    }

    #[test]
    fn proposer_frequency_randomized() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        for _ in 0..5 {
            let n = rng.gen_range(1..=40);
            let mut vals = Vec::with_capacity(n);
            for _ in 0..n {
                let power = rng.gen_range(1..=1000);
                vals.push(Validator::new(rand_key(&mut rng), power));
            }
            vals.sort_by(|a, b| a.address.cmp(&b.address));
            vals.dedup_by(|a, b| a.address == b.address);
            let mut set = ValidatorSet::new(vals).unwrap();
            assert_proposer_frequency(&mut set);
        }
    }

    #[test]
    fn power_sequence_one_two_three_four_is_exact() {
        // Total power 10; ten rounds must yield exactly [1, 2, 3, 4]
        // proposals in power order.
        let mut set = set_with_powers(&[1, 2, 3, 4]);
        let mut by_power = std::collections::HashMap::new();
        for _ in 0..10 {
            let addr = set.proposer().unwrap().address;
            let (_, val) = set.get_by_address(&addr).unwrap();
            *by_power.entry(val.voting_power).or_insert(0i64) += 1;
            set.increment_proposer_priority(1);
        }
        for power in [1, 2, 3, 4] {
            assert_eq!(
                by_power.get(&power).copied().unwrap_or(0),
                power,
                "validator with power {power} must propose exactly {power} times"
            );
        }
    }

    #[test]
    fn copy_increment_equals_sequential_increments() {
        let base = set_with_powers(&[3, 7, 11]);
        let jumped = base.copy_increment_proposer_priority(5);
        let mut stepped = base.clone();
        for _ in 0..5 {
            stepped.increment_proposer_priority(1);
        }
        assert_eq!(jumped, stepped);
    }

    #[test]
    fn equal_power_validators_alternate() {
        let mut set = set_with_powers(&[10, 10]);
        let first = set.proposer().unwrap().address;
        set.increment_proposer_priority(1);
        let second = set.proposer().unwrap().address;
        assert_ne!(first, second, "equal-power validators must alternate");
        set.increment_proposer_priority(1);
        assert_eq!(set.proposer().unwrap().address, first);
    }

    #[test]
    fn added_validator_priority_is_never_positive() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let mut set = set_with_powers(&[rng.gen_range(1..1000), rng.gen_range(1..1000)]);
            set.increment_proposer_priority(rng.gen_range(1..50));

            let newcomer = Validator::new(rand_key(&mut rng), rng.gen_range(1..1000));
            let addr = newcomer.address;
            set.update_with_change_set(&[newcomer]).unwrap();

            let (_, added) = set.get_by_address(&addr).unwrap();
            assert!(
                added.proposer_priority <= 0,
                "a just-added validator must not lead the priority window"
            );
        }
    }

    #[test]
    fn added_validator_cannot_propose_its_first_round() {
        let mut set = set_with_powers(&[10, 10]);
        let newcomer = Validator::new(test_key(99), 1000);
        let addr = newcomer.address;
        set.update_with_change_set(&[newcomer]).unwrap();
        assert_ne!(
            set.proposer().map(|v| v.address),
            Some(addr),
            "the round that adds a validator must not elect it"
        );
    }

    #[test]
    fn single_validator_priority_stays_zero() {
        // With one validator: +power, then -total cancels every round.
        let mut set = set_with_powers(&[10]);
        for _ in 0..10 {
            set.increment_proposer_priority(1);
            assert_eq!(set.proposer().unwrap().proposer_priority, 0);
        }
    }

    #[test]
    fn rescale_is_idempotent() {
        let mut set = set_with_powers(&[1, 1]);
        set.validators[0].proposer_priority = 100;
        set.validators[1].proposer_priority = -100;
        set.rescale_priorities(50);
        let snapshot: Vec<i64> = set.validators.iter().map(|v| v.proposer_priority).collect();
        set.rescale_priorities(50);
        let after: Vec<i64> = set.validators.iter().map(|v| v.proposer_priority).collect();
        assert_eq!(snapshot, after);
        let spread = snapshot.iter().max().unwrap() - snapshot.iter().min().unwrap();
        assert!(spread <= 50);
    }

    #[test]
    fn rescale_survives_extreme_priorities() {
        let mut set = set_with_powers(&[1, 1]);
        set.validators[0].proposer_priority = i64::MAX;
        set.validators[1].proposer_priority = i64::MIN;
        // Spread exceeds i64::MAX; must not overflow.
        set.rescale_priorities(set.total_voting_power() * PRIORITY_WINDOW_SIZE_FACTOR);
        set.increment_proposer_priority(1);
        set.validate_basic().unwrap();
    }

    #[test]
    fn hash_ignores_priorities_but_not_powers() {
        let a = set_with_powers(&[5, 10]);
        let b = a.copy_increment_proposer_priority(3);
        assert_eq!(a.hash(), b.hash(), "rotation must not change the set hash");

        let mut c = a.clone();
        let mut update = c.validators()[0].clone();
        update.voting_power += 1;
        c.update_with_change_set(&[update]).unwrap();
        assert_ne!(a.hash(), c.hash(), "power changes must change the set hash");
    }

    #[test]
    fn update_power_preserves_priority() {
        let mut set = set_with_powers(&[10, 20]);
        set.increment_proposer_priority(3);
        let addr = set.validators()[0].address;
        let before = set.validators()[0].proposer_priority;
        let spread_bound =
            PRIORITY_WINDOW_SIZE_FACTOR * (set.total_voting_power() + 1);

        let mut update = set.validators()[0].clone();
        update.voting_power += 1;
        set.update_with_change_set(&[update]).unwrap();

        let (_, after) = set.get_by_address(&addr).unwrap();
        // The accumulated priority survives modulo rescale/centering.
        assert!(
            (after.proposer_priority - before).abs() <= spread_bound,
            "priority must be carried over, not reset"
        );
    }

    #[test]
    fn proposer_tie_breaks_to_smaller_address() {
        let mut a = Validator::new(test_key(1), 10);
        let mut b = Validator::new(test_key(2), 10);
        a.proposer_priority = 5;
        b.proposer_priority = 5;
        let expected = a.address.min(b.address);
        let winner = match a.compare_proposer_priority(&b) {
            Ordering::Greater => a.address,
            _ => b.address,
        };
        assert_eq!(winner, expected);
    }
}
