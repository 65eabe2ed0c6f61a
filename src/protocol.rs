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

//! Swap commands and their execution. An [`Orchestrator`] runs one [`Command`] against a chain
//! client and a wallet, moving a [`Swap`] through the transitions the command implies, and returns
//! an [`Outcome`] to report to the user.

use std::fmt;
use std::time::Duration;

use bitcoin::{Address, Amount, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::audit::{audit_contract, inspect_contract, AuditResult};
use crate::bitcoin::fee::{SatPerKvB, DUST_LIMIT};
use crate::bitcoin::timelock::CltvLocktime;
use crate::bitcoin::{Bitcoin, ChainProfile};
use crate::consensus::serialize_hex;
use crate::crypto::{generate_secret, hash_secret, Secret, SecretHash};
use crate::role::SwapRole;
use crate::script::Contract;
use crate::swap::{observe, Event, Swap, SwapState};
use crate::syncer::{ChainClient, ChainTip, Deadline};
use crate::transaction::{build_redeem_tx, build_refund_tx, extract_secret};
use crate::wallet::Wallet;
use crate::Error;

/// Default time allowed to every command for its calls to the node.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings of a command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Node RPC server, `host[:port]`, normalized with [`normalize_address`].
    pub server: String,
    pub rpc_user: Option<String>,
    pub rpc_pass: Option<String>,
    pub fee_rate: SatPerKvB,
    pub timeout: Duration,
    pub profile: Bitcoin,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            rpc_user: None,
            rpc_pass: None,
            fee_rate: SatPerKvB::default(),
            timeout: DEFAULT_TIMEOUT,
            profile: Bitcoin::default(),
        }
    }
}

impl Config {
    /// URL of the node RPC server, with the default port of the profile network when none is
    /// given.
    pub fn rpc_url(&self) -> Result<String, Error> {
        normalize_address(&self.server, self.profile.network().default_rpc_port())
    }
}

/// Normalize a `host[:port]` server address into an `http` URL, appending `default_port` when no
/// port is given. IPv6 hosts are accepted bracketed, with or without a port, or bare without port.
pub fn normalize_address(address: &str, default_port: u16) -> Result<String, Error> {
    let invalid = |reason: &str| {
        Error::InvalidParameter(format!("server address {:?} {}", address, reason))
    };

    let trimmed = address.trim().trim_end_matches('/');
    let (scheme, authority) = match trimmed.split_once("://") {
        Some((scheme @ ("http" | "https"), rest)) => (scheme, rest),
        Some(_) => return Err(invalid("must use the http or https scheme")),
        None => ("http", trimmed),
    };
    if authority.contains('/') {
        return Err(invalid("must not contain a path"));
    }

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| invalid("has an unclosed IPv6 bracket"))?;
        match after {
            "" => (format!("[{}]", host), None),
            _ => match after.strip_prefix(':') {
                Some(port) => (format!("[{}]", host), Some(port)),
                None => return Err(invalid("has garbage after the IPv6 host")),
            },
        }
    } else if authority.matches(':').count() > 1 {
        (format!("[{}]", authority), None)
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host.to_string(), Some(port)),
            None => (authority.to_string(), None),
        }
    };
    if host.is_empty() || host == "[]" {
        return Err(invalid("has no host"));
    }

    let port = match port {
        Some(port) => match port.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(invalid("has an invalid port")),
        },
        None => default_port,
    };
    Ok(format!("{}://{}:{}", scheme, host, port))
}

/// A swap step requested by the user.
#[derive(Debug, Clone)]
pub enum Command {
    /// Create the first contract of a swap with a new secret, paying the participant.
    Initiate { participant: Address, amount: Amount },
    /// Create the answering contract, paying the initiator against the same secret hash.
    Participate {
        initiator: Address,
        amount: Amount,
        secret_hash: SecretHash,
    },
    /// Spend a counterparty contract with the secret.
    Redeem {
        contract: Vec<u8>,
        contract_tx: Transaction,
        secret: Secret,
    },
    /// Take back the funds of an own contract once its locktime is reached.
    Refund {
        contract: Vec<u8>,
        contract_tx: Transaction,
    },
    /// Recover the secret from the redemption of an own contract.
    ExtractSecret {
        redemption_tx: Transaction,
        secret_hash: SecretHash,
    },
    /// Check a counterparty contract, optionally against the amount it is expected to lock.
    AuditContract {
        contract: Vec<u8>,
        contract_tx: Transaction,
        claimed: Option<Amount>,
    },
}

/// What a command produced, with the swap contract as the command left it.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A contract was created, it must now be funded with `amount` by the caller.
    Created {
        role: SwapRole,
        /// Only known to the initiator.
        secret: Option<Secret>,
        secret_hash: SecretHash,
        contract: Contract,
        contract_address: Address,
        amount: Amount,
        swap: Swap,
    },
    Audited {
        result: AuditResult,
        /// Whether the node knows the funding transaction.
        known: bool,
        swap: Swap,
    },
    Redeemed {
        txid: Txid,
        transaction: Transaction,
        fee: Amount,
        swap: Swap,
    },
    Refunded {
        txid: Txid,
        transaction: Transaction,
        fee: Amount,
        swap: Swap,
    },
    SecretExtracted { secret: Secret, swap: Swap },
}

impl Outcome {
    pub fn swap(&self) -> &Swap {
        match self {
            Self::Created { swap, .. }
            | Self::Audited { swap, .. }
            | Self::Redeemed { swap, .. }
            | Self::Refunded { swap, .. }
            | Self::SecretExtracted { swap, .. } => swap,
        }
    }

    /// State of the swap contract after the command.
    pub fn state(&self) -> SwapState {
        self.swap().state()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Created {
                role,
                secret,
                secret_hash,
                contract,
                contract_address,
                amount,
                ..
            } => {
                if let Some(secret) = secret {
                    writeln!(f, "Secret:      {}", secret)?;
                }
                writeln!(f, "Secret hash: {}", secret_hash)?;
                writeln!(f)?;
                writeln!(f, "Contract ({}):", contract_address)?;
                writeln!(f, "{}", contract)?;
                writeln!(f)?;
                let locktime = contract.params().locktime;
                writeln!(f, "Locktime: {} ({})", locktime, locktime.semantics())?;
                write!(
                    f,
                    "Fund the contract address with {}, then share the contract and its funding \
                     transaction with the {}",
                    amount,
                    role.other()
                )
            }
            Self::Audited { result, known, .. } => {
                write!(f, "{}", result)?;
                if !known {
                    write!(
                        f,
                        "\n\nWarning: contract transaction {} is not known to the node",
                        result.outpoint.txid
                    )?;
                }
                Ok(())
            }
            Self::Redeemed {
                txid,
                transaction,
                fee,
                ..
            } => {
                writeln!(f, "Redeem fee: {}", fee)?;
                writeln!(f, "Redeem transaction ({}):", txid)?;
                write!(f, "{}", serialize_hex(transaction))
            }
            Self::Refunded {
                txid,
                transaction,
                fee,
                ..
            } => {
                writeln!(f, "Refund fee: {}", fee)?;
                writeln!(f, "Refund transaction ({}):", txid)?;
                write!(f, "{}", serialize_hex(transaction))
            }
            Self::SecretExtracted { secret, .. } => write!(f, "Secret: {}", secret),
        }
    }
}

/// Runs commands against a chain client and a wallet.
pub struct Orchestrator<C, W, P> {
    chain: C,
    wallet: W,
    profile: P,
    fee_rate: SatPerKvB,
    timeout: Duration,
}

impl<C, W, P> Orchestrator<C, W, P>
where
    C: ChainClient,
    W: Wallet,
    P: ChainProfile,
{
    pub fn new(chain: C, wallet: W, profile: P, fee_rate: SatPerKvB, timeout: Duration) -> Self {
        Self {
            chain,
            wallet,
            profile,
            fee_rate,
            timeout,
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }

    /// Execute the command, every call to the node or the wallet shares one deadline.
    pub fn run(&self, command: Command) -> Result<Outcome, Error> {
        let deadline = Deadline::after(self.timeout);
        match command {
            Command::Initiate {
                participant,
                amount,
            } => {
                let secret = generate_secret()?;
                let secret_hash = hash_secret(&secret, self.profile.hash_algorithm());
                self.create(
                    SwapRole::Initiator,
                    &participant,
                    amount,
                    secret_hash,
                    Some(secret),
                    deadline,
                )
            }
            Command::Participate {
                initiator,
                amount,
                secret_hash,
            } => self.create(
                SwapRole::Participant,
                &initiator,
                amount,
                secret_hash,
                None,
                deadline,
            ),
            Command::Redeem {
                contract,
                contract_tx,
                secret,
            } => {
                let (mut swap, contract, result, _) =
                    self.inspect(&contract, &contract_tx, deadline)?;
                swap.next(Event::RedeemPublished)?;
                let transaction = build_redeem_tx(
                    &self.profile,
                    &contract,
                    &contract_tx,
                    &secret,
                    self.fee_rate,
                    &self.wallet,
                    deadline,
                )?;
                let txid = self.chain.broadcast(&transaction, deadline)?;
                swap.apply(Event::RedeemPublished)?;
                Ok(Outcome::Redeemed {
                    txid,
                    fee: spend_fee(&result, &transaction),
                    transaction,
                    swap,
                })
            }
            Command::Refund {
                contract,
                contract_tx,
            } => {
                let (mut swap, contract, result, tip) =
                    self.inspect(&contract, &contract_tx, deadline)?;
                swap.next(Event::RefundPublished)?;
                let transaction = build_refund_tx(
                    &self.profile,
                    &contract,
                    &contract_tx,
                    &tip,
                    self.fee_rate,
                    &self.wallet,
                    deadline,
                )?;
                let txid = self.chain.broadcast(&transaction, deadline)?;
                swap.apply(Event::RefundPublished)?;
                Ok(Outcome::Refunded {
                    txid,
                    fee: spend_fee(&result, &transaction),
                    transaction,
                    swap,
                })
            }
            Command::ExtractSecret {
                redemption_tx,
                secret_hash,
            } => Ok(Outcome::SecretExtracted {
                secret: extract_secret(&redemption_tx, &secret_hash)?,
                // the redemption itself shows the contract spent through the secret branch
                swap: Swap::resume(SwapState::Redeemed),
            }),
            Command::AuditContract {
                contract,
                contract_tx,
                claimed,
            } => {
                let tip = self.chain.latest_block(deadline)?;
                let result = audit_contract(&self.profile, &contract, &contract_tx, &tip, claimed)?;
                let contract = Contract::parse(&self.profile, &contract)?;
                let mut swap = self.observe_funding(&contract, &contract_tx, deadline)?;
                let known = swap.state() == SwapState::Funded;
                if known {
                    swap.apply(Event::Audited)?;
                }
                Ok(Outcome::Audited {
                    result,
                    known,
                    swap,
                })
            }
        }
    }

    fn create(
        &self,
        role: SwapRole,
        counterparty: &Address,
        amount: Amount,
        secret_hash: SecretHash,
        secret: Option<Secret>,
        deadline: Deadline,
    ) -> Result<Outcome, Error> {
        if amount.as_sat() < DUST_LIMIT {
            return Err(Error::InvalidParameter(format!(
                "amount {} is below the dust limit of {} satoshi",
                amount, DUST_LIMIT
            )));
        }
        let tip = self.chain.latest_block(deadline)?;
        let semantics = self.profile.locktime_semantics();
        let target = semantics.current(&tip) + role.lock_duration(semantics) as u64;
        let locktime = u32::try_from(target)
            .map(CltvLocktime::new)
            .map_err(|_| Error::InvalidParameter(format!("locktime {} is out of range", target)))?;
        let refund = self.wallet.new_address(deadline)?;

        let mut swap = Swap::new();
        let contract = Contract::build(
            &self.profile,
            counterparty,
            &refund,
            secret_hash.clone(),
            locktime,
            &tip,
        )?;
        swap.apply(Event::ContractBuilt)?;

        Ok(Outcome::Created {
            role,
            secret,
            secret_hash,
            contract_address: contract.address(&self.profile),
            contract,
            amount,
            swap,
        })
    }

    // The swap is funded only if the node knows the transaction paying the contract.
    fn observe_funding(
        &self,
        contract: &Contract,
        contract_tx: &Transaction,
        deadline: Deadline,
    ) -> Result<Swap, Error> {
        let txid = contract_tx.txid();
        let funding = self.chain.transaction(&txid, deadline)?;
        if funding.is_none() {
            warn!("contract transaction {} is not known to the node", txid);
        }
        let mut swap = Swap::resume(SwapState::Initiated);
        if observe(&self.profile, contract, funding.as_ref(), None) == SwapState::Funded {
            swap.apply(Event::FundingSeen)?;
        }
        Ok(swap)
    }

    // Parse the contract and check its funding before spending it. The locktime sanity is only
    // reported, spending late is still possible.
    fn inspect(
        &self,
        contract: &[u8],
        contract_tx: &Transaction,
        deadline: Deadline,
    ) -> Result<(Swap, Contract, AuditResult, ChainTip), Error> {
        let contract = Contract::parse(&self.profile, contract)?;
        let tip = self.chain.latest_block(deadline)?;
        let result = inspect_contract(&self.profile, &contract, contract_tx, &tip)?;
        let mut swap = self.observe_funding(&contract, contract_tx, deadline)?;
        if result.is_well_formed && swap.state() == SwapState::Funded {
            swap.apply(Event::Audited)?;
        }
        Ok((swap, contract, result, tip))
    }
}

impl<C, W> Orchestrator<C, W, Bitcoin>
where
    C: ChainClient,
    W: Wallet,
{
    /// Run commands with the profile, fee rate and timeout of the configuration.
    pub fn from_config(chain: C, wallet: W, config: &Config) -> Self {
        Self::new(chain, wallet, config.profile, config.fee_rate, config.timeout)
    }
}

fn spend_fee(result: &AuditResult, tx: &Transaction) -> Amount {
    let spent: u64 = tx.output.iter().map(|tx_out| tx_out.value).sum();
    result
        .locked_amount
        .checked_sub(Amount::from_sat(spent))
        .unwrap_or(Amount::ZERO)
}
