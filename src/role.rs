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

//! Roles used to distinguish the two participants of a swap and the timing risk each of them
//! accepts.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bitcoin::timelock::LocktimeSemantics;
use crate::consensus;

/// Possible roles during the swap. The initiator generates the secret and moves first, the
/// participant answers with a contract locked by the same secret hash.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum SwapRole {
    /// Knows the secret from the start, funds first and redeems the participant contract first.
    Initiator,
    /// Learns the secret from the initiator redemption and uses it to redeem the initiator
    /// contract.
    Participant,
}

impl SwapRole {
    /// Return the other role possible in the swap.
    pub fn other(&self) -> Self {
        match self {
            Self::Initiator => Self::Participant,
            Self::Participant => Self::Initiator,
        }
    }

    /// Distance between the current chain time and the locktime of a contract created by this
    /// role, expressed in the unit of the given semantics.
    ///
    /// The initiator contract must stay locked twice as long as the participant one: the
    /// participant needs enough time to redeem the initiator contract once the secret has been
    /// revealed, before the initiator can refund it.
    pub fn lock_duration(&self, semantics: LocktimeSemantics) -> u32 {
        match (self, semantics) {
            (Self::Initiator, LocktimeSemantics::Timestamp) => 48 * 60 * 60,
            (Self::Participant, LocktimeSemantics::Timestamp) => 24 * 60 * 60,
            (Self::Initiator, LocktimeSemantics::BlockHeight) => 288,
            (Self::Participant, LocktimeSemantics::BlockHeight) => 144,
        }
    }
}

impl FromStr for SwapRole {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initiator" | "initiator" => Ok(SwapRole::Initiator),
            "Participant" | "participant" => Ok(SwapRole::Participant),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}
