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

//! Transactions spending a funded contract: the redeem transaction revealing the secret and the
//! refund transaction available once the locktime is reached, plus the recovery of the secret
//! from an observed redemption.

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction, Script};
use bitcoin::blockdata::transaction::{EcdsaSighashType, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::util::ecdsa::EcdsaSig;
use bitcoin::util::key::PublicKey;
use bitcoin::util::sighash::SighashCache;
use bitcoin::Amount;

use crate::audit::find_output;
use crate::bitcoin::fee::{self, SatPerKvB};
use crate::bitcoin::timelock::CltvLocktime;
use crate::bitcoin::{ChainProfile, ScriptTemplate};
use crate::consensus::CanonicalBytes;
use crate::crypto::{hash_secret, verify_secret, Secret, SecretHash, SECRET_SIZE};
use crate::script::{Contract, ScriptPath};
use crate::syncer::{ChainTip, Deadline};
use crate::wallet::{self, SigningRequest, Wallet};
use crate::Error;

/// `nSequence` of a redeem input, final.
pub const FINAL_SEQUENCE: u32 = 0xffff_ffff;

/// Computes the signature hash of the input with `SIGHASH_ALL`. SegWit contracts follow
/// [`BIP-143`][bip-143], legacy ones the original algorithm with the contract as script code.
///
/// [bip-143]: https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script: &Script,
    value: u64,
    template: ScriptTemplate,
) -> Result<Sha256dHash, Error> {
    match template {
        ScriptTemplate::SegwitV0 => SighashCache::new(tx)
            .segwit_signature_hash(input_index, script, value, EcdsaSighashType::All)
            .map(|sighash| sighash.as_hash())
            .map_err(|e| Error::InvalidParameter(format!("cannot compute sighash: {}", e))),
        ScriptTemplate::Legacy => Ok(tx
            .signature_hash(input_index, script, EcdsaSighashType::All.to_u32())
            .as_hash()),
    }
}

/// Place the spending data on the first input: in the witness for SegWit contracts, in the script
/// signature for legacy ones.
fn finalize(
    tx: &mut Transaction,
    template: ScriptTemplate,
    path: ScriptPath,
    sig: EcdsaSig,
    pubkey: PublicKey,
    secret: Option<&Secret>,
    script: &Script,
) {
    match template {
        ScriptTemplate::SegwitV0 => {
            let mut stack = vec![sig.to_vec(), pubkey.to_bytes()];
            match (path, secret) {
                (ScriptPath::Redeem, Some(secret)) => {
                    stack.push(secret.as_canonical_bytes());
                    stack.push(vec![1]);
                }
                _ => stack.push(vec![]),
            }
            stack.push(script.to_bytes());
            tx.input[0].witness = Witness::from_vec(stack);
        }
        ScriptTemplate::Legacy => {
            let builder = Builder::new()
                .push_slice(&sig.to_vec())
                .push_slice(&pubkey.to_bytes());
            let builder = match (path, secret) {
                (ScriptPath::Redeem, Some(secret)) => builder
                    .push_slice(secret.as_bytes())
                    .push_opcode(opcodes::all::OP_PUSHNUM_1),
                _ => builder.push_opcode(opcodes::all::OP_PUSHBYTES_0),
            };
            tx.input[0].script_sig = builder.push_slice(script.as_bytes()).into_script();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spend(
    profile: &impl ChainProfile,
    contract: &Contract,
    funding_tx: &Transaction,
    path: ScriptPath,
    lock_time: u32,
    sequence: u32,
    secret: Option<&Secret>,
    fee_rate: SatPerKvB,
    wallet: &impl Wallet,
    deadline: Deadline,
) -> Result<Transaction, Error> {
    let template = profile.script_template();
    let contract_address = contract.address(profile);
    let (outpoint, tx_out) = find_output(funding_tx, &contract_address.script_pubkey()).ok_or(
        Error::AddressMismatch {
            expected: contract_address,
            txid: funding_tx.txid(),
        },
    )?;
    let destination = match path {
        ScriptPath::Redeem => contract.recipient_address(profile),
        ScriptPath::Refund => contract.refund_address(profile),
    };

    let mut tx = Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: Script::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: tx_out.value,
            script_pubkey: destination.script_pubkey(),
        }],
    };
    let fee = fee::set_fee(
        &mut tx,
        Amount::from_sat(tx_out.value),
        contract.as_script(),
        template,
        fee_rate,
    )?;
    debug!("{} spend of {} pays a fee of {}", path, outpoint, fee);

    let key = contract.signer(path);
    let sighash = signature_hash(&tx, 0, contract.as_script(), tx_out.value, template)?;
    let request = SigningRequest {
        transaction: &tx,
        input_index: 0,
        script_code: contract.as_script(),
        value: tx_out.value,
        sighash,
        key,
    };
    let (pubkey, sig) = wallet.sign_input(&request, deadline)?;
    if pubkey.pubkey_hash() != key {
        return Err(Error::Signing(wallet::Error::InvalidKey(format!(
            "wallet signed with {}, the contract requires {}",
            pubkey.pubkey_hash(),
            key
        ))));
    }

    finalize(
        &mut tx,
        template,
        path,
        sig,
        pubkey,
        secret,
        contract.as_script(),
    );
    debug!("built {} transaction {}", path, tx.txid());
    Ok(tx)
}

/// Build and sign the transaction spending the contract through the secret branch, paying the
/// recipient. Fails with [`Error::SecretMismatch`] before anything else if the secret does not
/// open the hash lock.
pub fn build_redeem_tx(
    profile: &impl ChainProfile,
    contract: &Contract,
    funding_tx: &Transaction,
    secret: &Secret,
    fee_rate: SatPerKvB,
    wallet: &impl Wallet,
    deadline: Deadline,
) -> Result<Transaction, Error> {
    let expected = &contract.params().secret_hash;
    if !verify_secret(secret, expected) {
        return Err(Error::SecretMismatch {
            expected: expected.clone(),
            found: hash_secret(secret, expected.algorithm()),
        });
    }
    spend(
        profile,
        contract,
        funding_tx,
        ScriptPath::Redeem,
        0,
        FINAL_SEQUENCE,
        Some(secret),
        fee_rate,
        wallet,
        deadline,
    )
}

/// Build and sign the transaction spending the contract through the timelock branch, paying back
/// the refund key. Fails with [`Error::LocktimeNotElapsed`] when the transaction could not be
/// mined on top of the given tip.
pub fn build_refund_tx(
    profile: &impl ChainProfile,
    contract: &Contract,
    funding_tx: &Transaction,
    now: &ChainTip,
    fee_rate: SatPerKvB,
    wallet: &impl Wallet,
    deadline: Deadline,
) -> Result<Transaction, Error> {
    let locktime = contract.params().locktime;
    if !locktime.is_elapsed(now) {
        return Err(Error::LocktimeNotElapsed {
            locktime,
            now: locktime.semantics().current(now),
        });
    }
    spend(
        profile,
        contract,
        funding_tx,
        ScriptPath::Refund,
        locktime.as_u32(),
        CltvLocktime::enabling_sequence(),
        None,
        fee_rate,
        wallet,
        deadline,
    )
}

/// Recover the secret from a transaction redeeming a contract. Every witness item and script
/// signature push of every input is tried against the hash.
pub fn extract_secret(tx: &Transaction, secret_hash: &SecretHash) -> Result<Secret, Error> {
    tx.input
        .iter()
        .flat_map(|txin| {
            let pushes = txin.script_sig.instructions().filter_map(|ins| match ins {
                Ok(Instruction::PushBytes(b)) => Some(b.to_vec()),
                _ => None,
            });
            txin.witness.iter().map(|item| item.to_vec()).chain(pushes)
        })
        .filter(|item| item.len() == SECRET_SIZE)
        .filter_map(|item| Secret::from_canonical_bytes(&item).ok())
        .find(|secret| verify_secret(secret, secret_hash))
        .ok_or_else(|| Error::SecretNotFound(secret_hash.clone(), tx.txid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::address::pubkey_hash;
    use crate::bitcoin::timelock::LocktimeSemantics;
    use crate::bitcoin::Bitcoin;
    use crate::blockchain::Network;
    use crate::crypto::{generate_secret, HashAlgorithm};
    use crate::wallet::KeyStore;
    use bitcoin::blockdata::transaction::OutPoint;
    use bitcoin::hashes::Hash;
    use bitcoin::{Address, BlockHash};
    use std::time::Duration;

    const NOW: u32 = 1_700_000_000;
    const LOCKTIME: u32 = NOW + 86_400;

    fn tip(time: u32) -> ChainTip {
        ChainTip {
            height: 1_000,
            hash: BlockHash::from_inner([0u8; 32]),
            time,
        }
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    struct Setup {
        profile: Bitcoin,
        contract: Contract,
        funding: Transaction,
        secret: Secret,
        recipient: KeyStore,
        refund: KeyStore,
    }

    fn setup(profile: Bitcoin) -> Setup {
        let network = profile.bitcoin_network();
        let recipient = KeyStore::new(network, profile.script_template());
        let refund = KeyStore::new(network, profile.script_template());
        let secret = generate_secret().unwrap();
        let (locktime, now) = match profile.locktime_semantics() {
            LocktimeSemantics::Timestamp => (LOCKTIME, tip(NOW)),
            LocktimeSemantics::BlockHeight => (1_144, tip(NOW)),
        };
        let contract = Contract::build(
            &profile,
            &recipient.generate().unwrap(),
            &refund.generate().unwrap(),
            hash_secret(&secret, profile.hash_algorithm()),
            CltvLocktime::new(locktime),
            &now,
        )
        .unwrap();
        let funding = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence: FINAL_SEQUENCE,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 100_000,
                script_pubkey: contract.address(&profile).script_pubkey(),
            }],
        };
        Setup {
            profile,
            contract,
            funding,
            secret,
            recipient,
            refund,
        }
    }

    fn paid_key(profile: &Bitcoin, tx: &Transaction) -> bitcoin::hash_types::PubkeyHash {
        let address =
            Address::from_script(&tx.output[0].script_pubkey, profile.bitcoin_network()).unwrap();
        pubkey_hash(&address, profile.bitcoin_network()).unwrap()
    }

    #[test]
    fn redeem_reveals_the_secret() {
        for profile in [
            Bitcoin::new(Network::Local),
            Bitcoin::new(Network::Local)
                .with_script_template(ScriptTemplate::Legacy)
                .with_hash_algorithm(HashAlgorithm::Ripemd160),
        ] {
            let s = setup(profile);
            let tx = build_redeem_tx(
                &s.profile,
                &s.contract,
                &s.funding,
                &s.secret,
                SatPerKvB::from_sat(1000),
                &s.recipient,
                deadline(),
            )
            .unwrap();

            assert_eq!(tx.lock_time, 0);
            assert_eq!(tx.input[0].sequence, FINAL_SEQUENCE);
            assert_eq!(tx.input[0].previous_output, OutPoint::new(s.funding.txid(), 0));
            assert!(tx.output[0].value < 100_000);
            assert_eq!(paid_key(&s.profile, &tx), s.contract.params().recipient);

            let extracted = extract_secret(&tx, &s.contract.params().secret_hash).unwrap();
            assert_eq!(extracted, s.secret);
        }
    }

    #[test]
    fn redeem_with_wrong_secret_is_rejected() {
        let s = setup(Bitcoin::new(Network::Local));
        let res = build_redeem_tx(
            &s.profile,
            &s.contract,
            &s.funding,
            &Secret::from_bytes([0u8; 32]),
            SatPerKvB::default(),
            &s.recipient,
            deadline(),
        );
        assert!(matches!(res, Err(Error::SecretMismatch { .. })));
    }

    #[test]
    fn redeem_with_wrong_wallet_is_rejected() {
        let s = setup(Bitcoin::new(Network::Local));
        let res = build_redeem_tx(
            &s.profile,
            &s.contract,
            &s.funding,
            &s.secret,
            SatPerKvB::default(),
            &s.refund,
            deadline(),
        );
        assert!(matches!(
            res,
            Err(Error::Signing(wallet::Error::MissingKey(_)))
        ));
    }

    #[test]
    fn refund_before_and_after_locktime() {
        let s = setup(Bitcoin::new(Network::Local));
        let res = build_refund_tx(
            &s.profile,
            &s.contract,
            &s.funding,
            &tip(LOCKTIME - 1),
            SatPerKvB::default(),
            &s.refund,
            deadline(),
        );
        assert!(matches!(
            res,
            Err(Error::LocktimeNotElapsed { now, .. }) if now == LOCKTIME as u64 - 1
        ));

        // spendable as soon as the chain time reaches the locktime
        let tx = build_refund_tx(
            &s.profile,
            &s.contract,
            &s.funding,
            &tip(LOCKTIME),
            SatPerKvB::default(),
            &s.refund,
            deadline(),
        )
        .unwrap();
        assert_eq!(tx.lock_time, LOCKTIME);
        assert_eq!(tx.input[0].sequence, 0xffff_fffe);
        assert_eq!(paid_key(&s.profile, &tx), s.contract.params().refund);
        // the refund branch selector is empty
        assert_eq!(tx.input[0].witness.len(), 4);
        assert!(matches!(
            extract_secret(&tx, &s.contract.params().secret_hash),
            Err(Error::SecretNotFound(..))
        ));
    }

    #[test]
    fn refund_with_height_locktime() {
        let profile =
            Bitcoin::new(Network::Local).with_locktime_semantics(LocktimeSemantics::BlockHeight);
        let s = setup(profile);
        let mut at = tip(NOW);
        at.height = 1_143;
        let res = build_refund_tx(
            &s.profile,
            &s.contract,
            &s.funding,
            &at,
            SatPerKvB::default(),
            &s.refund,
            deadline(),
        );
        assert!(matches!(res, Err(Error::LocktimeNotElapsed { .. })));
        at.height = 1_144;
        let tx = build_refund_tx(
            &s.profile,
            &s.contract,
            &s.funding,
            &at,
            SatPerKvB::default(),
            &s.refund,
            deadline(),
        )
        .unwrap();
        assert_eq!(tx.lock_time, 1_144);
    }

    fn profiles() -> [Bitcoin; 2] {
        [
            Bitcoin::new(Network::Local),
            Bitcoin::new(Network::Local)
                .with_script_template(ScriptTemplate::Legacy)
                .with_hash_algorithm(HashAlgorithm::Ripemd160)
                .with_locktime_semantics(LocktimeSemantics::BlockHeight),
        ]
    }

    fn verify_spend(s: &Setup, tx: &Transaction) {
        tx.verify(|outpoint| {
            (outpoint.txid == s.funding.txid())
                .then(|| s.funding.output[outpoint.vout as usize].clone())
        })
        .unwrap();
    }

    #[test]
    fn signed_redeem_passes_script_verification() {
        for profile in profiles() {
            let s = setup(profile);
            let tx = build_redeem_tx(
                &s.profile,
                &s.contract,
                &s.funding,
                &s.secret,
                SatPerKvB::from_sat(1000),
                &s.recipient,
                deadline(),
            )
            .unwrap();
            verify_spend(&s, &tx);
        }
    }

    #[test]
    fn signed_refund_passes_script_verification() {
        for profile in profiles() {
            let s = setup(profile);
            let mut at = tip(LOCKTIME);
            at.height = 1_144;
            let tx = build_refund_tx(
                &s.profile,
                &s.contract,
                &s.funding,
                &at,
                SatPerKvB::from_sat(1000),
                &s.refund,
                deadline(),
            )
            .unwrap();
            verify_spend(&s, &tx);

            // nLockTime is committed to by the signature and checked by CLTV
            let mut early = tx.clone();
            early.lock_time -= 1;
            assert!(early
                .verify(|_| Some(s.funding.output[0].clone()))
                .is_err());
        }
    }

    #[test]
    fn unfunded_contract_cannot_be_spent() {
        let s = setup(Bitcoin::new(Network::Local));
        let mut funding = s.funding.clone();
        funding.output[0].script_pubkey = Script::new();
        let res = build_redeem_tx(
            &s.profile,
            &s.contract,
            &funding,
            &s.secret,
            SatPerKvB::default(),
            &s.recipient,
            deadline(),
        );
        assert!(matches!(res, Err(Error::AddressMismatch { .. })));
    }
}
