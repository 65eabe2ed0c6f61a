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

//! The hash time locked contract: a script paying to the recipient against the secret, or back to
//! the refund key once the locktime is reached.
//!
//! ```text
//! OP_IF
//!     OP_SIZE 32 OP_EQUALVERIFY <hash op> <secret hash> OP_EQUALVERIFY
//!     OP_DUP OP_HASH160 <recipient pubkey hash>
//! OP_ELSE
//!     <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP
//!     OP_DUP OP_HASH160 <refund pubkey hash>
//! OP_ENDIF
//! OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! Only scripts byte-for-byte equal to this template are accepted when parsing.

use std::fmt;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction, Instructions, Script};
use bitcoin::hash_types::PubkeyHash;
use bitcoin::hashes::Hash;
use bitcoin::Address;
use serde::{Deserialize, Serialize};

use crate::bitcoin::address::{contract_address, pkh_address, pubkey_hash};
use crate::bitcoin::timelock::CltvLocktime;
use crate::bitcoin::ChainProfile;
use crate::consensus::{self, CanonicalBytes};
use crate::crypto::{HashAlgorithm, SecretHash, SECRET_SIZE};
use crate::syncer::ChainTip;
use crate::Error;

/// Branch of the contract executed by a spend.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum ScriptPath {
    /// Secret branch, pays the recipient.
    Redeem,
    /// Timelock branch, pays back the refund key.
    Refund,
}

/// Parameters a contract commits to.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractParams {
    pub recipient: PubkeyHash,
    pub refund: PubkeyHash,
    pub secret_hash: SecretHash,
    pub locktime: CltvLocktime,
}

/// A contract script along with the parameters it was built from or decoded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    script: Script,
    params: ContractParams,
}

fn malformed(reason: impl fmt::Display) -> Error {
    Error::MalformedContract(reason.to_string())
}

/// Decode the locktime operand of `OP_CHECKLOCKTIMEVERIFY`: a minimally encoded, non negative
/// script number of at most 5 bytes.
fn read_locktime(bytes: &[u8]) -> Result<u32, Error> {
    let (last, rest) = bytes
        .split_last()
        .ok_or_else(|| malformed("empty locktime push"))?;
    if bytes.len() > 5 {
        return Err(malformed("locktime exceeds 5 bytes"));
    }
    if *last & 0x7f == 0 && rest.last().map_or(true, |b| b & 0x80 == 0) {
        return Err(malformed("locktime is not minimally encoded"));
    }
    if *last & 0x80 != 0 {
        return Err(malformed("locktime must be positive"));
    }
    let value = bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64);
    u32::try_from(value).map_err(|_| malformed(format!("locktime {} exceeds u32", value)))
}

fn hash_opcode(algorithm: HashAlgorithm) -> opcodes::All {
    match algorithm {
        HashAlgorithm::Sha256 => opcodes::all::OP_SHA256,
        HashAlgorithm::Ripemd160 => opcodes::all::OP_RIPEMD160,
    }
}

fn expect_op(ints: &mut Instructions, expected: opcodes::All) -> Result<(), Error> {
    ints.next()
        .ok_or_else(|| malformed(format!("missing {:?}", expected)))
        .map_or_else(Err, |v| match v {
            Ok(Instruction::Op(op)) if op == expected => Ok(()),
            Ok(found) => Err(malformed(format!(
                "expected {:?}, found {:?}",
                expected, found
            ))),
            Err(e) => Err(malformed(e)),
        })
}

fn expect_push<'a>(ints: &mut Instructions<'a>, name: &str) -> Result<&'a [u8], Error> {
    ints.next()
        .ok_or_else(|| malformed(format!("missing {}", name)))
        .map_or_else(Err, |v| match v {
            Ok(Instruction::PushBytes(b)) => Ok(b),
            Ok(found) => Err(malformed(format!(
                "expected {} push, found {:?}",
                name, found
            ))),
            Err(e) => Err(malformed(e)),
        })
}

fn expect_pubkey_hash(ints: &mut Instructions, name: &str) -> Result<PubkeyHash, Error> {
    let bytes = expect_push(ints, name)?;
    PubkeyHash::from_slice(bytes).map_err(|_| {
        malformed(format!(
            "{} must be 20 bytes, found {} bytes",
            name,
            bytes.len()
        ))
    })
}

impl Contract {
    /// Serialize the parameters into the canonical contract script.
    pub fn script(params: &ContractParams) -> Script {
        let ContractParams {
            recipient,
            refund,
            secret_hash,
            locktime,
        } = params;
        Builder::new()
            .push_opcode(opcodes::all::OP_IF)
            .push_opcode(opcodes::all::OP_SIZE)
            .push_int(SECRET_SIZE as i64)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(hash_opcode(secret_hash.algorithm()))
            .push_slice(secret_hash.as_bytes())
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(&recipient[..])
            .push_opcode(opcodes::all::OP_ELSE)
            .push_int(locktime.as_u32().into())
            .push_opcode(opcodes::all::OP_CLTV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(&refund[..])
            .push_opcode(opcodes::all::OP_ENDIF)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script()
    }

    /// Decode the parameters of a script following the contract template exactly. Any deviation
    /// is a [`Error::MalformedContract`].
    pub fn from_script(s: &Script) -> Result<ContractParams, Error> {
        use bitcoin::blockdata::opcodes::all;

        let mut ints = s.instructions_minimal();

        // Secret branch
        expect_op(&mut ints, all::OP_IF)?;
        expect_op(&mut ints, all::OP_SIZE)?;
        let size = expect_push(&mut ints, "secret size")?;
        if size != [SECRET_SIZE as u8] {
            return Err(malformed(format!(
                "secret size must be {}, found {}",
                SECRET_SIZE,
                hex::encode(size)
            )));
        }
        expect_op(&mut ints, all::OP_EQUALVERIFY)?;
        let algorithm = ints
            .next()
            .ok_or_else(|| malformed("missing hash opcode"))
            .map_or_else(Err, |v| match v {
                Ok(Instruction::Op(all::OP_SHA256)) => Ok(HashAlgorithm::Sha256),
                Ok(Instruction::Op(all::OP_RIPEMD160)) => Ok(HashAlgorithm::Ripemd160),
                Ok(found) => Err(malformed(format!(
                    "expected OP_SHA256 or OP_RIPEMD160, found {:?}",
                    found
                ))),
                Err(e) => Err(malformed(e)),
            })?;
        let digest = expect_push(&mut ints, "secret hash")?;
        let secret_hash = SecretHash::new(algorithm, digest.to_vec()).map_err(|_| {
            malformed(format!(
                "{} secret hash must be {} bytes, found {} bytes",
                algorithm,
                algorithm.digest_len(),
                digest.len()
            ))
        })?;
        expect_op(&mut ints, all::OP_EQUALVERIFY)?;
        expect_op(&mut ints, all::OP_DUP)?;
        expect_op(&mut ints, all::OP_HASH160)?;
        let recipient = expect_pubkey_hash(&mut ints, "recipient pubkey hash")?;

        // Timelock branch
        expect_op(&mut ints, all::OP_ELSE)?;
        let locktime = ints
            .next()
            .ok_or_else(|| malformed("missing locktime"))
            .map_or_else(Err, |v| match v {
                Ok(Instruction::PushBytes(b)) => read_locktime(b),
                Ok(Instruction::Op(op))
                    if op.into_u8() >= all::OP_PUSHNUM_1.into_u8()
                        && op.into_u8() <= all::OP_PUSHNUM_16.into_u8() =>
                {
                    Ok((op.into_u8() - all::OP_PUSHNUM_1.into_u8() + 1) as u32)
                }
                Ok(found) => Err(malformed(format!("expected locktime, found {:?}", found))),
                Err(e) => Err(malformed(e)),
            })?;
        let locktime = CltvLocktime::new(locktime);
        expect_op(&mut ints, all::OP_CLTV)?;
        expect_op(&mut ints, all::OP_DROP)?;
        expect_op(&mut ints, all::OP_DUP)?;
        expect_op(&mut ints, all::OP_HASH160)?;
        let refund = expect_pubkey_hash(&mut ints, "refund pubkey hash")?;

        // Common tail
        expect_op(&mut ints, all::OP_ENDIF)?;
        expect_op(&mut ints, all::OP_EQUALVERIFY)?;
        expect_op(&mut ints, all::OP_CHECKSIG)?;

        // Script done, return an error if some error or some instruction
        if let Some(v) = ints.next() {
            return match v {
                Ok(_) => Err(malformed("Too many opcodes")),
                Err(e) => Err(malformed(e)),
            };
        }

        let params = ContractParams {
            recipient,
            refund,
            secret_hash,
            locktime,
        };
        // Minimal pushes are enforced by the iterator, numbers must be minimal too
        if Self::script(&params) != *s {
            return Err(malformed("contract is not canonically encoded"));
        }
        Ok(params)
    }

    /// Build a new contract after validating every parameter against the profile and the current
    /// chain tip.
    pub fn build(
        profile: &impl ChainProfile,
        recipient: &Address,
        refund: &Address,
        secret_hash: SecretHash,
        locktime: CltvLocktime,
        now: &ChainTip,
    ) -> Result<Self, Error> {
        let network = profile.bitcoin_network();
        let recipient = pubkey_hash(recipient, network)?;
        let refund = pubkey_hash(refund, network)?;
        if recipient == refund {
            return Err(Error::InvalidParameter(format!(
                "recipient and refund must differ, both are {}",
                recipient
            )));
        }
        if secret_hash.algorithm() != profile.hash_algorithm() {
            return Err(Error::InvalidParameter(format!(
                "secret hash algorithm must be {}, found {}",
                profile.hash_algorithm(),
                secret_hash.algorithm()
            )));
        }
        let semantics = profile.locktime_semantics();
        if locktime.semantics() != semantics {
            return Err(Error::InvalidParameter(format!(
                "locktime {} must be a {}, found a {}",
                locktime,
                semantics,
                locktime.semantics()
            )));
        }
        let margin = semantics.safety_margin();
        if locktime.remaining(now) < margin as i64 {
            return Err(Error::InvalidParameter(format!(
                "locktime {} must be at least {} past the current {}",
                locktime,
                margin,
                semantics.current(now)
            )));
        }

        let params = ContractParams {
            recipient,
            refund,
            secret_hash,
            locktime,
        };
        let script = Self::script(&params);
        debug!("built contract {}", hex::encode(script.as_bytes()));
        Ok(Self { script, params })
    }

    /// Decode a serialized contract and check it against the profile hash lock.
    pub fn parse(profile: &impl ChainProfile, bytes: &[u8]) -> Result<Self, Error> {
        let script = Script::from(bytes.to_vec());
        let params = Self::from_script(&script)?;
        if params.secret_hash.algorithm() != profile.hash_algorithm() {
            return Err(malformed(format!(
                "hash lock must use {}, found {}",
                profile.hash_algorithm(),
                params.secret_hash.algorithm()
            )));
        }
        Ok(Self { script, params })
    }

    pub fn params(&self) -> &ContractParams {
        &self.params
    }

    pub fn as_script(&self) -> &Script {
        &self.script
    }

    /// Address of the contract output for the profile template and network.
    pub fn address(&self, profile: &impl ChainProfile) -> Address {
        contract_address(
            &self.script,
            profile.script_template(),
            profile.bitcoin_network(),
        )
    }

    /// Address paid by a redeem transaction.
    pub fn recipient_address(&self, profile: &impl ChainProfile) -> Address {
        pkh_address(
            &self.params.recipient,
            profile.script_template(),
            profile.bitcoin_network(),
        )
    }

    /// Address paid by a refund transaction.
    pub fn refund_address(&self, profile: &impl ChainProfile) -> Address {
        pkh_address(
            &self.params.refund,
            profile.script_template(),
            profile.bitcoin_network(),
        )
    }

    /// Public key hash allowed to sign a spend through the given branch.
    pub fn signer(&self, path: ScriptPath) -> PubkeyHash {
        match path {
            ScriptPath::Redeem => self.params.recipient,
            ScriptPath::Refund => self.params.refund,
        }
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&consensus::serialize_hex(self))
    }
}

impl CanonicalBytes for Contract {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.script.to_bytes()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        let script = Script::from(bytes.to_vec());
        let params = Self::from_script(&script).map_err(consensus::Error::new)?;
        Ok(Self { script, params })
    }
}

/// Build a contract, see [`Contract::build`].
pub fn build_contract(
    profile: &impl ChainProfile,
    recipient: &Address,
    refund: &Address,
    secret_hash: SecretHash,
    locktime: CltvLocktime,
    now: &ChainTip,
) -> Result<Contract, Error> {
    Contract::build(profile, recipient, refund, secret_hash, locktime, now)
}

/// Decode the parameters of a serialized contract, see [`Contract::parse`].
pub fn parse_contract(profile: &impl ChainProfile, bytes: &[u8]) -> Result<ContractParams, Error> {
    Contract::parse(profile, bytes).map(|contract| contract.params)
}
