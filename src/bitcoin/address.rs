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

//! Address derivation and validation for contracts and their spends. Contracts commit to public
//! key hashes, so only pay-to-pubkey-hash addresses (P2PKH or P2WPKH) are accepted as recipient or
//! refund destinations.

use bitcoin::hash_types::{PubkeyHash, ScriptHash, WScriptHash};
use bitcoin::hashes::Hash;
use bitcoin::util::address::{Payload, WitnessVersion};
use bitcoin::{Address, Script};

use crate::bitcoin::ScriptTemplate;
use crate::Error;

/// Whether an address network is acceptable where `expected` is required. Test networks share
/// their base58 prefixes and are treated as interchangeable, mainnet must match exactly.
pub fn is_compatible(expected: bitcoin::Network, found: bitcoin::Network) -> bool {
    match (expected, found) {
        (bitcoin::Network::Bitcoin, found) => found == bitcoin::Network::Bitcoin,
        (_, found) => found != bitcoin::Network::Bitcoin,
    }
}

/// Extract the public key hash of a P2PKH or P2WPKH address, fails if the address is of another
/// kind or belongs to an incompatible network.
pub fn pubkey_hash(address: &Address, network: bitcoin::Network) -> Result<PubkeyHash, Error> {
    if !is_compatible(network, address.network) {
        return Err(Error::InvalidParameter(format!(
            "address {} is for network {}, expected {}",
            address, address.network, network
        )));
    }
    match &address.payload {
        Payload::PubkeyHash(pkh) => Ok(*pkh),
        Payload::WitnessProgram {
            version: WitnessVersion::V0,
            program,
        } if program.len() == 20 => PubkeyHash::from_slice(program)
            .map_err(|e| Error::InvalidParameter(format!("invalid witness program: {}", e))),
        _ => Err(Error::InvalidParameter(format!(
            "address {} is not a pubkey-hash address",
            address
        ))),
    }
}

/// Address paying to the public key hash, P2WPKH for SegWit contracts and P2PKH for legacy ones.
pub fn pkh_address(pkh: &PubkeyHash, template: ScriptTemplate, network: bitcoin::Network) -> Address {
    let payload = match template {
        ScriptTemplate::SegwitV0 => Payload::WitnessProgram {
            version: WitnessVersion::V0,
            program: pkh.into_inner().to_vec(),
        },
        ScriptTemplate::Legacy => Payload::PubkeyHash(*pkh),
    };
    Address { network, payload }
}

/// Address of the contract output: the script is hashed into a P2WSH or P2SH address depending on
/// the template.
pub fn contract_address(
    script: &Script,
    template: ScriptTemplate,
    network: bitcoin::Network,
) -> Address {
    let payload = match template {
        ScriptTemplate::SegwitV0 => Payload::WitnessProgram {
            version: WitnessVersion::V0,
            program: WScriptHash::hash(&script[..]).into_inner().to_vec(),
        },
        ScriptTemplate::Legacy => Payload::ScriptHash(ScriptHash::hash(&script[..])),
    };
    Address { network, payload }
}
