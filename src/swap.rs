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

//! Life cycle of one contract of a swap. Nothing is persisted between invocations: a swap is
//! created in the state observed on chain and moved forward by the events of the current command.

use bitcoin::Transaction;
use serde::{Deserialize, Serialize};

use crate::audit::find_output;
use crate::bitcoin::ChainProfile;
use crate::script::Contract;
use crate::transaction::extract_secret;
use crate::Error;

/// State of a contract. `Redeemed` and `Refunded` are final.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum SwapState {
    /// No contract exists yet.
    Unstarted,
    /// The contract is built but no funding has been seen.
    Initiated,
    /// A transaction pays the contract address.
    Funded,
    /// The contract output is spent through the secret branch.
    Redeemed,
    /// The contract output is spent through the timelock branch.
    Refunded,
}

impl SwapState {
    /// Whether no event can move the swap out of this state.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Redeemed | Self::Refunded)
    }
}

/// Events moving a swap forward.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum Event {
    ContractBuilt,
    FundingSeen,
    /// The contract passed an audit, does not change the state.
    Audited,
    RedeemPublished,
    RefundPublished,
}

/// A swap contract state with its audit flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    state: SwapState,
    audited: bool,
}

impl Default for Swap {
    fn default() -> Self {
        Self::new()
    }
}

impl Swap {
    /// A swap with no contract yet.
    pub fn new() -> Self {
        Self::resume(SwapState::Unstarted)
    }

    /// A swap recovered in a state observed on chain, not audited yet.
    pub fn resume(state: SwapState) -> Self {
        Self {
            state,
            audited: false,
        }
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn is_audited(&self) -> bool {
        self.audited
    }

    /// The swap as it would be after the event, fails with [`Error::InvalidTransition`] when the
    /// event is not allowed in the current state.
    pub fn next(&self, event: Event) -> Result<Swap, Error> {
        let mut next = *self;
        next.state = match (self.state, event) {
            (SwapState::Unstarted, Event::ContractBuilt) => SwapState::Initiated,
            (SwapState::Initiated, Event::FundingSeen) => SwapState::Funded,
            (SwapState::Funded, Event::Audited) => {
                next.audited = true;
                SwapState::Funded
            }
            (SwapState::Funded, Event::RedeemPublished) => SwapState::Redeemed,
            (SwapState::Funded, Event::RefundPublished) => SwapState::Refunded,
            (from, event) => return Err(Error::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Apply the event and return the new state. A failed transition leaves the swap unchanged.
    pub fn apply(&mut self, event: Event) -> Result<SwapState, Error> {
        let next = self.next(event)?;
        if next.state != self.state {
            info!("swap {} -> {} on {}", self.state, next.state, event);
        }
        *self = next;
        Ok(next.state)
    }
}

/// Derive the state of an existing contract from what the chain shows: the transaction funding
/// it, if any, and a transaction spending the funded output, if any. A spend revealing the secret
/// is a redemption, any other spend of the contract output is a refund.
pub fn observe(
    profile: &impl ChainProfile,
    contract: &Contract,
    funding: Option<&Transaction>,
    spend: Option<&Transaction>,
) -> SwapState {
    let outpoint = match funding
        .and_then(|tx| find_output(tx, &contract.address(profile).script_pubkey()))
    {
        Some((outpoint, _)) => outpoint,
        None => return SwapState::Initiated,
    };
    match spend {
        Some(tx) if tx.input.iter().any(|txin| txin.previous_output == outpoint) => {
            if extract_secret(tx, &contract.params().secret_hash).is_ok() {
                SwapState::Redeemed
            } else {
                SwapState::Refunded
            }
        }
        _ => SwapState::Funded,
    }
}
