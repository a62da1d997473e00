//! The pure state transition.
//!
//! Once the consensus loop decides a block, [`update_state`] folds it
//! into the chain state: validator sets rotate with their one-block
//! delay, consensus parameters merge their diff, and the deterministic
//! result root is recomputed. The function allocates no persistent state
//! and performs no I/O; every honest replica computes the identical
//! output or rejects with the identical error.

use crate::error::{Error, InvalidValidatorUpdate};
use crate::state::State;
use basalt_types::{
    tx_results_hash, BlockId, FinalizeBlockResponse, Header, Validator, ValidatorParams,
    ValidatorUpdate, MAX_TOTAL_VOTING_POWER,
};
use tracing::debug;

/// Validate the application's validator diff against the active
/// consensus parameters and convert it into change-set form.
///
/// Rejected diffs (negative or excessive power, key types outside
/// `params.pub_key_types`) are deterministic errors: consensus must halt
/// rather than diverge.
pub fn validate_validator_updates(
    updates: &[ValidatorUpdate],
    params: &ValidatorParams,
) -> Result<Vec<Validator>, Error> {
    let mut changes = Vec::with_capacity(updates.len());
    for update in updates {
        if update.power < 0 {
            return Err(InvalidValidatorUpdate::NegativePower {
                power: update.power,
            }
            .into());
        }
        if update.power > MAX_TOTAL_VOTING_POWER {
            return Err(InvalidValidatorUpdate::ExcessivePower {
                power: update.power,
                max: MAX_TOTAL_VOTING_POWER,
            }
            .into());
        }
        if !params.allows(update.pub_key.key_type()) {
            return Err(InvalidValidatorUpdate::DisallowedKeyType {
                key_type: update.pub_key.key_type(),
            }
            .into());
        }
        changes.push(Validator::new(update.pub_key, update.power));
    }
    Ok(changes)
}

/// Produce the state after `header.height`.
///
/// `validator_updates` must come from
/// [`validate_validator_updates`] over `responses.validator_updates`.
pub fn update_state(
    state: &State,
    block_id: &BlockId,
    header: &Header,
    responses: &FinalizeBlockResponse,
    validator_updates: &[Validator],
) -> Result<State, Error> {
    // Copy the next validators and apply the diff; the result takes
    // effect at height + 2.
    let mut n_vals = state.next_validators.clone();
    let mut last_height_vals_changed = state.last_height_validators_changed;
    if !validator_updates.is_empty() {
        n_vals.update_with_change_set(validator_updates)?;
        last_height_vals_changed = header.height + 1 + 1;
        debug!(
            height = header.height,
            updates = validator_updates.len(),
            "validator set changed"
        );
    }
    if n_vals.is_empty() {
        return Err(Error::EmptyValidatorSet);
    }
    // Advance one round even without membership changes, so the proposer
    // rotation keeps pace with the chain.
    n_vals.increment_proposer_priority(1);

    let mut next_params = state.consensus_params.clone();
    let mut last_height_params_changed = state.last_height_consensus_params_changed;
    if let Some(diff) = &responses.consensus_param_updates {
        if !diff.is_empty() {
            next_params = next_params.update(diff);
            next_params.validate_basic()?;
            // The new params take effect at the next height.
            last_height_params_changed = header.height + 1;
            debug!(height = header.height, "consensus params changed");
        }
    }

    let mut version = state.version.clone();
    version.consensus.app = next_params.version.app;
    version.consensus.block = header.version.block;

    Ok(State {
        chain_id: state.chain_id.clone(),
        initial_height: state.initial_height,
        last_block_height: header.height,
        last_block_id: *block_id,
        last_block_time: header.time,
        validators: state.next_validators.clone(),
        next_validators: n_vals,
        last_validators: state.validators.clone(),
        last_height_validators_changed: last_height_vals_changed,
        consensus_params: next_params,
        last_height_consensus_params_changed: last_height_params_changed,
        last_results_hash: tx_results_hash(&responses.tx_results),
        app_hash: responses.app_hash.clone(),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{
        BlockParams, ConsensusParamsUpdate, ExecTxResult, GenesisDoc, GenesisValidator, Hash,
        KeyType, PublicKey, Timestamp, ValidatorSet,
    };

    fn test_key(seed: u8) -> PublicKey {
        PublicKey::Ed25519([seed; 32])
    }

    fn genesis_state(powers: &[i64]) -> State {
        let validators = powers
            .iter()
            .enumerate()
            .map(|(i, &power)| GenesisValidator {
                address: None,
                pub_key: test_key(i as u8 + 1),
                power,
                name: String::new(),
            })
            .collect();
        let mut doc = GenesisDoc {
            genesis_time: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            chain_id: "test-chain".to_string(),
            initial_height: 1,
            consensus_params: None,
            validators,
            app_hash: vec![],
        };
        doc.validate_and_complete().unwrap();
        State::from_genesis(&doc).unwrap()
    }

    fn next_header(state: &State) -> (BlockId, Header) {
        let height = state.last_block_height + 1;
        let header = Header {
            chain_id: state.chain_id.clone(),
            height,
            time: Timestamp::from_nanos(state.last_block_time.as_nanos() + 1_000_000_000),
            version: state.version.consensus,
            app_hash: state.app_hash.clone(),
            last_results_hash: state.last_results_hash,
            validators_hash: state.validators.hash(),
            next_validators_hash: state.next_validators.hash(),
            ..Default::default()
        };
        let block_id = BlockId {
            hash: Hash::of(&height.to_be_bytes()),
            ..Default::default()
        };
        (block_id, header)
    }

    fn apply(state: &State, responses: &FinalizeBlockResponse) -> Result<State, Error> {
        let (block_id, header) = next_header(state);
        let updates = validate_validator_updates(
            &responses.validator_updates,
            &state.consensus_params.validator,
        )?;
        update_state(state, &block_id, &header, responses, &updates)
    }

    #[test]
    fn rotates_validator_sets_with_one_block_delay() {
        let state = genesis_state(&[10, 20]);
        let next = apply(&state, &FinalizeBlockResponse::default()).unwrap();

        assert_eq!(next.last_block_height, 1);
        assert_eq!(next.validators, state.next_validators);
        assert_eq!(next.last_validators, state.validators);
        assert_eq!(
            next.next_validators,
            state.next_validators.copy_increment_proposer_priority(1)
        );
    }

    #[test]
    fn empty_updates_still_advance_the_rotation() {
        let state = genesis_state(&[10, 10]);
        let a = apply(&state, &FinalizeBlockResponse::default()).unwrap();
        let b = apply(&a, &FinalizeBlockResponse::default()).unwrap();
        assert_ne!(
            a.next_validators.proposer().unwrap().address,
            b.next_validators.proposer().unwrap().address,
            "equal-power proposers must alternate"
        );
    }

    #[test]
    fn single_validator_priority_stays_zero_across_transitions() {
        let mut state = genesis_state(&[10]);
        for _ in 0..5 {
            state = apply(&state, &FinalizeBlockResponse::default()).unwrap();
            assert_eq!(
                state.next_validators.proposer().unwrap().proposer_priority,
                0
            );
        }
    }

    #[test]
    fn validator_change_bumps_change_height_by_two() {
        let state = genesis_state(&[10]);
        let responses = FinalizeBlockResponse {
            validator_updates: vec![ValidatorUpdate::new(test_key(50), 4)],
            ..Default::default()
        };
        let next = apply(&state, &responses).unwrap();
        assert_eq!(next.last_height_validators_changed, 1 + 2);
        assert_eq!(next.validators.len(), 1, "change is delayed one block");
        assert_eq!(next.next_validators.len(), 2);

        let after = apply(&next, &FinalizeBlockResponse::default()).unwrap();
        assert_eq!(after.validators.len(), 2, "change lands two blocks later");
        assert_eq!(
            after.last_height_validators_changed, 3,
            "no further change preserves the height"
        );
    }

    #[test]
    fn key_swap_keeps_set_size() {
        // Replace validator 1's key: remove old, add new with the same
        // power, in one diff.
        let state = genesis_state(&[10, 20]);
        let old_key = test_key(1);
        let new_key = test_key(77);
        let responses = FinalizeBlockResponse {
            validator_updates: vec![
                ValidatorUpdate::new(old_key, 0),
                ValidatorUpdate::new(new_key, 10),
            ],
            ..Default::default()
        };
        let next = apply(&state, &responses).unwrap();
        assert!(next.validators.has_address(&old_key.address()));
        assert!(!next.validators.has_address(&new_key.address()));
        assert!(next.next_validators.has_address(&new_key.address()));
        assert!(!next.next_validators.has_address(&old_key.address()));
        assert_eq!(next.next_validators.len(), 2);
    }

    #[test]
    fn removing_all_validators_fails() {
        let state = genesis_state(&[10]);
        let responses = FinalizeBlockResponse {
            validator_updates: vec![ValidatorUpdate::new(test_key(1), 0)],
            ..Default::default()
        };
        let err = apply(&state, &responses).unwrap_err();
        assert!(matches!(err, Error::EmptyValidatorSet));
    }

    #[test]
    fn negative_power_update_rejected() {
        let state = genesis_state(&[10]);
        let updates = [ValidatorUpdate::new(test_key(2), -5)];
        let err =
            validate_validator_updates(&updates, &state.consensus_params.validator).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidValidatorUpdate(InvalidValidatorUpdate::NegativePower { .. })
        ));
    }

    #[test]
    fn disallowed_key_type_rejected() {
        let state = genesis_state(&[10]);
        // Default params only allow ed25519.
        assert!(state
            .consensus_params
            .validator
            .allows(KeyType::Ed25519));
        let updates = [ValidatorUpdate::new(PublicKey::Secp256k1([2u8; 33]), 5)];
        let err =
            validate_validator_updates(&updates, &state.consensus_params.validator).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidValidatorUpdate(InvalidValidatorUpdate::DisallowedKeyType { .. })
        ));
    }

    #[test]
    fn params_update_merges_and_tracks_height() {
        let state = genesis_state(&[10]);
        let responses = FinalizeBlockResponse {
            consensus_param_updates: Some(ConsensusParamsUpdate {
                block: Some(BlockParams {
                    max_bytes: 2048,
                    max_gas: -1,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let next = apply(&state, &responses).unwrap();
        assert_eq!(next.consensus_params.block.max_bytes, 2048);
        assert_eq!(next.last_height_consensus_params_changed, 2);
        assert_eq!(
            next.consensus_params.evidence, state.consensus_params.evidence,
            "untouched components inherit"
        );

        let after = apply(&next, &FinalizeBlockResponse::default()).unwrap();
        assert_eq!(
            after.last_height_consensus_params_changed, 2,
            "empty diff preserves the change height"
        );
    }

    #[test]
    fn invalid_params_update_rejected() {
        let state = genesis_state(&[10]);
        let responses = FinalizeBlockResponse {
            consensus_param_updates: Some(ConsensusParamsUpdate {
                block: Some(BlockParams {
                    max_bytes: 0,
                    max_gas: -1,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = apply(&state, &responses).unwrap_err();
        assert!(matches!(err, Error::ConsensusParams(_)));
    }

    #[test]
    fn results_hash_and_app_hash_are_recorded() {
        let state = genesis_state(&[10]);
        let responses = FinalizeBlockResponse {
            tx_results: vec![ExecTxResult {
                code: 0,
                data: b"result".to_vec(),
                log: "nondeterministic".to_string(),
                ..Default::default()
            }],
            app_hash: b"app-root".to_vec(),
            ..Default::default()
        };
        let next = apply(&state, &responses).unwrap();
        assert_eq!(next.last_results_hash, tx_results_hash(&responses.tx_results));
        assert_eq!(next.app_hash, b"app-root");

        // Empty results hash to the empty-merkle sentinel.
        let empty = apply(&next, &FinalizeBlockResponse::default()).unwrap();
        assert_eq!(empty.last_results_hash, tx_results_hash(&[]));
    }

    #[test]
    fn transition_on_empty_set_fails() {
        let mut doc = GenesisDoc {
            genesis_time: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            chain_id: "test-chain".to_string(),
            initial_height: 1,
            consensus_params: None,
            validators: vec![],
            app_hash: vec![],
        };
        doc.validate_and_complete().unwrap();
        let state = State::from_genesis(&doc).unwrap();
        assert_eq!(state.next_validators, ValidatorSet::empty());

        let err = apply(&state, &FinalizeBlockResponse::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyValidatorSet));
    }
}
