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

//! Atomicswap library
//!
//! The Bitcoin leg of a cross-chain atomic swap: hash time locked contracts are built, audited,
//! redeemed with the swap secret or refunded after their locktime. The other leg lives on another
//! chain and is driven by a counterpart tool sharing the same secret hash.
//!
//! Each swap goes through the following steps, one command invocation each:
//!
//! 1. the initiator generates a secret and locks funds in a contract paying the participant
//!    against the secret, refundable after 48 hours,
//! 2. the participant audits it and locks funds on its side with the same secret hash,
//!    refundable after 24 hours,
//! 3. the initiator audits the participant contract and redeems it, revealing the secret,
//! 4. the participant extracts the secret from that redemption and redeems the initiator
//!    contract.
//!
//! If a party walks away, the other one refunds its contract once its locktime is reached.

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate log;

use ::bitcoin::{Address, Amount, Txid};
use thiserror::Error;

pub mod audit;
pub mod bitcoin;
pub mod blockchain;
pub mod consensus;
pub mod crypto;
pub mod protocol;
pub mod role;
pub mod script;
pub mod swap;
pub mod syncer;
pub mod transaction;
pub mod wallet;

use crate::bitcoin::timelock::CltvLocktime;
use crate::crypto::SecretHash;
use crate::swap::{Event, SwapState};

/// A list of possible errors when performing the Bitcoin leg of a cross-chain atomic swap.
/// Structural errors carry the expected and the observed values and are never retried, only
/// [`Error::NetworkError`] is transient.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller supplied value failed validation.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// The contract does not follow the exact contract template.
    #[error("Malformed contract: {0}")]
    MalformedContract(String),
    /// The contract is funded with less than claimed.
    #[error("Amount mismatch: expected at least {expected}, found {found}")]
    AmountMismatch { expected: Amount, found: Amount },
    /// No output of the transaction pays the contract address.
    #[error("Address mismatch: transaction {txid} has no output paying {expected}")]
    AddressMismatch { expected: Address, txid: Txid },
    /// The secret does not hash to the contract secret hash.
    #[error("Secret mismatch: expected hash {expected}, secret hashes to {found}")]
    SecretMismatch {
        expected: SecretHash,
        found: SecretHash,
    },
    /// The refund locktime is not reached at the chain tip.
    #[error("Locktime {locktime} not elapsed, chain is at {now}")]
    LocktimeNotElapsed {
        locktime: CltvLocktime,
        now: u64,
    },
    /// The transaction does not reveal a secret for the hash.
    #[error("No secret for hash {0} in transaction {1}")]
    SecretNotFound(SecretHash, Txid),
    /// The chain backend could not be reached or did not answer in time.
    #[error("Network error: {0}")]
    NetworkError(syncer::Error),
    /// The chain backend refused the transaction, the node reason is reported verbatim.
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),
    /// The operating system random source failed.
    #[error("Secret generation failed: {0}")]
    SecretGeneration(rand::Error),
    /// The event is not allowed in the current swap state.
    #[error("Invalid transition: {event} is not allowed in state {from}")]
    InvalidTransition { from: SwapState, event: Event },
    /// The wallet failed to produce a valid signature.
    #[error("Signing error: {0}")]
    Signing(wallet::Error),
    /// A consensus error during encoding/decoding operation or data type missmatch.
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
}

impl Error {
    /// Whether the operation may succeed if attempted again, i.e. the failure comes from the
    /// transport and not from the swap data.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::NetworkError(_))
    }
}

impl From<syncer::Error> for Error {
    fn from(err: syncer::Error) -> Self {
        match err {
            syncer::Error::Rejected(reason) => Self::BroadcastRejected(reason),
            err => Self::NetworkError(err),
        }
    }
}

impl From<wallet::Error> for Error {
    fn from(err: wallet::Error) -> Self {
        match err {
            wallet::Error::Syncer(err) => err.into(),
            err => Self::Signing(err),
        }
    }
}
