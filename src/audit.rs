// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Audit of a counterparty contract against the transaction funding it. An audit never has side
//! effects, it only reports what the contract commits to and whether it is safe to rely on.

use std::fmt;

use bitcoin::blockdata::transaction::{OutPoint, Transaction, TxOut};
use bitcoin::{Address, Amount, Script};
use serde::Serialize;

use crate::bitcoin::timelock::{CltvLocktime, LocktimeSemantics};
use crate::bitcoin::ChainProfile;
use crate::crypto::SecretHash;
use crate::script::Contract;
use crate::syncer::ChainTip;
use crate::Error;

/// What a funded contract commits to, derived from the contract and its funding transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditResult {
    pub contract_address: Address,
    pub outpoint: OutPoint,
    pub recipient: Address,
    pub refund: Address,
    pub secret_hash: SecretHash,
    pub locktime: CltvLocktime,
    #[serde(with = "bitcoin::util::amount::serde::as_sat")]
    pub locked_amount: Amount,
    /// Distance to the locktime at audit time, in blocks or seconds, negative once reached.
    pub remaining: i64,
    /// The locktime is in the future and within the maximum horizon.
    pub is_well_formed: bool,
}

impl AuditResult {
    fn remaining_display(&self) -> String {
        if self.remaining <= 0 {
            return "refund locktime has been reached".to_string();
        }
        match self.locktime.semantics() {
            LocktimeSemantics::BlockHeight => {
                format!("locktime reached in {} blocks", self.remaining)
            }
            LocktimeSemantics::Timestamp => {
                let secs = self.remaining;
                format!(
                    "locktime reached in {}h {}m {}s",
                    secs / 3600,
                    secs % 3600 / 60,
                    secs % 60
                )
            }
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Contract address:        {}", self.contract_address)?;
        writeln!(f, "Contract outpoint:       {}", self.outpoint)?;
        writeln!(f, "Contract value:          {}", self.locked_amount)?;
        writeln!(f, "Recipient address:       {}", self.recipient)?;
        writeln!(f, "Author's refund address: {}", self.refund)?;
        writeln!(f)?;
        writeln!(f, "Secret hash:             {}", self.secret_hash)?;
        writeln!(
            f,
            "Locktime:                {} ({})",
            self.locktime,
            self.locktime.semantics()
        )?;
        write!(f, "                         {}", self.remaining_display())
    }
}

/// Find the output of the transaction paying to the script, if any.
pub(crate) fn find_output(tx: &Transaction, script_pubkey: &Script) -> Option<(OutPoint, TxOut)> {
    tx.output
        .iter()
        .enumerate()
        .find(|(_, tx_out)| tx_out.script_pubkey == *script_pubkey)
        .map(|(ix, tx_out)| (OutPoint::new(tx.txid(), ix as u32), tx_out.clone()))
}

fn locktime_is_sane(locktime: CltvLocktime, now: &ChainTip) -> bool {
    !locktime.is_elapsed(now)
        && locktime.remaining(now) <= locktime.semantics().max_horizon() as i64
}

/// Check the funding of an already parsed contract and report its parameters. Locktime sanity is
/// reported in [`AuditResult::is_well_formed`] without failing, which lets redeem and refund
/// flows inspect contracts whose locktime has passed.
pub fn inspect_contract(
    profile: &impl ChainProfile,
    contract: &Contract,
    funding_tx: &Transaction,
    now: &ChainTip,
) -> Result<AuditResult, Error> {
    let contract_address = contract.address(profile);
    let (outpoint, tx_out) = find_output(funding_tx, &contract_address.script_pubkey()).ok_or(
        Error::AddressMismatch {
            expected: contract_address.clone(),
            txid: funding_tx.txid(),
        },
    )?;

    let params = contract.params();
    let remaining = params.locktime.remaining(now);
    let is_well_formed = locktime_is_sane(params.locktime, now);
    if !is_well_formed {
        warn!(
            "contract locktime {} is not within the safe window at {}",
            params.locktime, now
        );
    }

    Ok(AuditResult {
        contract_address,
        outpoint,
        recipient: contract.recipient_address(profile),
        refund: contract.refund_address(profile),
        secret_hash: params.secret_hash.clone(),
        locktime: params.locktime,
        locked_amount: Amount::from_sat(tx_out.value),
        remaining,
        is_well_formed,
    })
}

/// Parse a serialized contract and audit it against its funding transaction. Fails on any
/// template deviation, when no output of the transaction pays the contract address, when the
/// locked value is below `claimed` or when the locktime is not in the safe window.
pub fn audit_contract(
    profile: &impl ChainProfile,
    contract: &[u8],
    funding_tx: &Transaction,
    now: &ChainTip,
    claimed: Option<Amount>,
) -> Result<AuditResult, Error> {
    let contract = Contract::parse(profile, contract)?;
    let result = inspect_contract(profile, &contract, funding_tx, now)?;

    if let Some(expected) = claimed {
        if result.locked_amount < expected {
            return Err(Error::AmountMismatch {
                expected,
                found: result.locked_amount,
            });
        }
    }
    if !result.is_well_formed {
        let semantics = result.locktime.semantics();
        return Err(Error::InvalidParameter(format!(
            "locktime {} must be after the current {} and at most {} ahead",
            result.locktime,
            semantics.current(now),
            semantics.max_horizon()
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::address::pkh_address;
    use crate::bitcoin::{Bitcoin, ScriptTemplate};
    use crate::blockchain::Network;
    use crate::consensus::CanonicalBytes;
    use crate::crypto::{hash_secret, HashAlgorithm, Secret};
    use bitcoin::blockdata::transaction::TxIn;
    use bitcoin::hash_types::PubkeyHash;
    use bitcoin::hashes::Hash;
    use bitcoin::{BlockHash, Witness};

    const NOW: u32 = 1_700_000_000;

    fn tip(time: u32) -> ChainTip {
        ChainTip {
            height: 1_000,
            hash: BlockHash::from_inner([0u8; 32]),
            time,
        }
    }

    fn contract(profile: &Bitcoin) -> Contract {
        let address = |b| {
            pkh_address(
                &PubkeyHash::from_inner([b; 20]),
                ScriptTemplate::SegwitV0,
                bitcoin::Network::Regtest,
            )
        };
        Contract::build(
            profile,
            &address(1),
            &address(2),
            hash_secret(&Secret::from_bytes([5; 32]), HashAlgorithm::Sha256),
            CltvLocktime::new(NOW + 86_400),
            &tip(NOW),
        )
        .unwrap()
    }

    fn funding(script_pubkey: Script, value: u64) -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence: 0xffff_ffff,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: 12_345,
                    script_pubkey: Script::new(),
                },
                TxOut {
                    value,
                    script_pubkey,
                },
            ],
        }
    }

    #[test]
    fn audit_funded_contract() {
        let profile = Bitcoin::new(Network::Local);
        let contract = contract(&profile);
        let tx = funding(contract.address(&profile).script_pubkey(), 50_000);
        let result = audit_contract(
            &profile,
            &contract.as_canonical_bytes(),
            &tx,
            &tip(NOW),
            Some(Amount::from_sat(50_000)),
        )
        .unwrap();
        assert_eq!(result.outpoint, OutPoint::new(tx.txid(), 1));
        assert_eq!(result.locked_amount, Amount::from_sat(50_000));
        assert_eq!(result.remaining, 86_400);
        assert!(result.is_well_formed);
        assert_eq!(result.recipient, contract.recipient_address(&profile));
        assert!(format!("{}", result).contains("locktime reached in 24h 0m 0s"));
    }

    #[test]
    fn foreign_address_funding_is_rejected() {
        let profile = Bitcoin::new(Network::Local);
        let contract = contract(&profile);
        let tx = funding(contract.refund_address(&profile).script_pubkey(), 50_000);
        let res = audit_contract(&profile, &contract.as_canonical_bytes(), &tx, &tip(NOW), None);
        assert!(matches!(res, Err(Error::AddressMismatch { .. })));
    }

    #[test]
    fn insufficient_amount_is_rejected() {
        let profile = Bitcoin::new(Network::Local);
        let contract = contract(&profile);
        let tx = funding(contract.address(&profile).script_pubkey(), 49_999);
        let res = audit_contract(
            &profile,
            &contract.as_canonical_bytes(),
            &tx,
            &tip(NOW),
            Some(Amount::from_sat(50_000)),
        );
        assert!(matches!(
            res,
            Err(Error::AmountMismatch { expected, found })
                if expected == Amount::from_sat(50_000) && found == Amount::from_sat(49_999)
        ));
    }

    #[test]
    fn locktime_sanity() {
        let profile = Bitcoin::new(Network::Local);
        let contract = contract(&profile);
        let tx = funding(contract.address(&profile).script_pubkey(), 50_000);

        // locktime already reached
        let late = tip(NOW + 86_401);
        let res = audit_contract(&profile, &contract.as_canonical_bytes(), &tx, &late, None);
        assert!(matches!(res, Err(Error::InvalidParameter(_))));
        let inspected = inspect_contract(&profile, &contract, &tx, &late).unwrap();
        assert!(!inspected.is_well_formed);
        assert!(format!("{}", inspected).contains("refund locktime has been reached"));

        // locktime too far away
        let early = tip(NOW - 30 * 24 * 3600);
        let res = audit_contract(&profile, &contract.as_canonical_bytes(), &tx, &early, None);
        assert!(matches!(res, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn serialize_audit_in_yaml() {
        let profile = Bitcoin::new(Network::Local);
        let contract = contract(&profile);
        let tx = funding(contract.address(&profile).script_pubkey(), 50_000);
        let result = inspect_contract(&profile, &contract, &tx, &tip(NOW)).unwrap();
        let s = serde_yaml::to_string(&result).expect("Encode audit result in yaml");
        assert!(s.contains("is_well_formed: true"));
        assert!(s.contains(&format!("secret_hash: {}", result.secret_hash)));
    }
}
