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

//! Implementation for the Bitcoin blockchain as the chain hosting the contract, with multiple
//! profiles (SegWit v0 or legacy script hash outputs, SHA-256 or RIPEMD-160 hash locks, height or
//! time locktimes).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bitcoin::timelock::LocktimeSemantics;
use crate::blockchain::Network;
use crate::consensus;
use crate::crypto::HashAlgorithm;

pub mod address;
pub mod amount;
pub mod fee;
#[cfg(feature = "rpc")]
#[cfg_attr(docsrs, doc(cfg(feature = "rpc")))]
pub mod rpc;
pub mod timelock;

/// Output template used to lock funds into a contract.
#[derive(Clone, Debug, Copy, Hash, Eq, PartialEq, Display, Serialize, Deserialize)]
pub enum ScriptTemplate {
    /// Pay to witness script hash, the contract is the witness script.
    #[display("SegwitV0")]
    SegwitV0,
    /// Pay to script hash, the contract is the redeem script.
    #[display("Legacy")]
    Legacy,
}

impl FromStr for ScriptTemplate {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SegwitV0" | "segwit" | "p2wsh" => Ok(Self::SegwitV0),
            "Legacy" | "legacy" | "p2sh" => Ok(Self::Legacy),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// Chain specific details the contract engine depends on. Everything that differs between
/// Bitcoin-family chains and deployments lives behind this trait.
pub trait ChainProfile {
    /// The network addresses and contracts belong to.
    fn network(&self) -> Network;

    /// Hash function of the hash lock.
    fn hash_algorithm(&self) -> HashAlgorithm;

    /// Unit of the contract locktimes built by this profile.
    fn locktime_semantics(&self) -> LocktimeSemantics;

    /// Output template used for contract addresses.
    fn script_template(&self) -> ScriptTemplate;

    /// The `bitcoin` crate network matching [`Self::network`].
    fn bitcoin_network(&self) -> bitcoin::Network {
        self.network().into()
    }
}

/// The Bitcoin chain profile. Defaults to SegWit v0 contracts, SHA-256 hash locks and timestamp
/// locktimes.
#[derive(Clone, Debug, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct Bitcoin {
    network: Network,
    hash_algorithm: HashAlgorithm,
    locktime_semantics: LocktimeSemantics,
    script_template: ScriptTemplate,
}

impl Bitcoin {
    /// Create a new Bitcoin profile for the network with default parameters.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            hash_algorithm: HashAlgorithm::Sha256,
            locktime_semantics: LocktimeSemantics::Timestamp,
            script_template: ScriptTemplate::SegwitV0,
        }
    }

    pub fn with_hash_algorithm(mut self, hash_algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = hash_algorithm;
        self
    }

    pub fn with_locktime_semantics(mut self, locktime_semantics: LocktimeSemantics) -> Self {
        self.locktime_semantics = locktime_semantics;
        self
    }

    pub fn with_script_template(mut self, script_template: ScriptTemplate) -> Self {
        self.script_template = script_template;
        self
    }
}

impl Default for Bitcoin {
    fn default() -> Self {
        Self::new(Network::Mainnet)
    }
}

impl fmt::Display for Bitcoin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Bitcoin<{}, {}, {}, {}>",
            self.network, self.script_template, self.hash_algorithm, self.locktime_semantics
        )
    }
}

impl ChainProfile for Bitcoin {
    fn network(&self) -> Network {
        self.network
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    fn locktime_semantics(&self) -> LocktimeSemantics {
        self.locktime_semantics
    }

    fn script_template(&self) -> ScriptTemplate {
        self.script_template
    }
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::Bitcoin,
            Network::Testnet => Self::Testnet,
            Network::Local => Self::Regtest,
        }
    }
}

impl From<bitcoin::Network> for Network {
    fn from(network: bitcoin::Network) -> Self {
        match network {
            bitcoin::Network::Bitcoin => Self::Mainnet,
            bitcoin::Network::Testnet => Self::Testnet,
            bitcoin::Network::Signet => Self::Testnet,
            bitcoin::Network::Regtest => Self::Local,
        }
    }
}
