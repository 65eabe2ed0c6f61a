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

#[macro_use]
extern crate log;

use std::process;
use std::str::FromStr;
use std::time::Duration;

use atomicswap::bitcoin::amount::parse_amount;
use atomicswap::bitcoin::fee::SatPerKvB;
use atomicswap::bitcoin::rpc::{RpcClient, RpcWallet};
use atomicswap::bitcoin::timelock::LocktimeSemantics;
use atomicswap::bitcoin::{Bitcoin, ChainProfile, ScriptTemplate};
use atomicswap::blockchain::Network;
use atomicswap::consensus::{self, deserialize_hex};
use atomicswap::crypto::{HashAlgorithm, Secret, SecretHash};
use atomicswap::protocol::{Command, Config, Orchestrator};
use atomicswap::Error;
use bitcoin::{Address, Amount, Transaction};
use clap::{Parser, Subcommand};

/// Bitcoin leg of cross-chain atomic swaps.
///
/// Builds, audits, redeems and refunds hash time locked contracts through a Bitcoin Core node.
/// Contracts must be funded externally with the address and amount printed by `initiate` and
/// `participate`.
#[derive(Parser, Debug)]
#[clap(name = "btcatomicswap", version)]
struct Cli {
    /// Node RPC server, host[:port], the network default port is used when omitted
    #[clap(short, long, default_value = "localhost")]
    server: String,

    /// Node RPC user
    #[clap(long)]
    rpcuser: Option<String>,

    /// Node RPC password
    #[clap(long)]
    rpcpass: Option<String>,

    /// Network to swap on: mainnet, testnet or regtest
    #[clap(long, default_value = "mainnet", conflicts_with = "testnet")]
    network: Network,

    /// Shortcut for --network testnet
    #[clap(long)]
    testnet: bool,

    /// Fee rate of redeem and refund transactions, satoshi per kvB or an amount such as
    /// "0.00002 BTC/kvB"
    #[clap(long, parse(try_from_str = parse_fee_rate))]
    feerate: Option<SatPerKvB>,

    /// Seconds allowed to a command for its calls to the node
    #[clap(long, default_value = "10")]
    timeout: u64,

    /// Contract output template: segwit (P2WSH) or legacy (P2SH)
    #[clap(long, default_value = "segwit")]
    template: ScriptTemplate,

    /// Hash lock function: sha256 or ripemd160
    #[clap(long, default_value = "sha256")]
    hash: HashAlgorithm,

    /// Locktime unit of new contracts: timestamp or height
    #[clap(long, default_value = "timestamp")]
    locktime: LocktimeSemantics,

    /// Log swap progress
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a contract with a new secret, paying the participant, refundable after 48 hours
    Initiate {
        /// Participant address, P2PKH or P2WPKH
        participant: Address,
        /// Amount to lock, in BTC unless a denomination is given
        #[clap(parse(try_from_str = parse_amount))]
        amount: Amount,
    },
    /// Create a contract paying the initiator against its secret hash, refundable after 24 hours
    Participate {
        /// Initiator address, P2PKH or P2WPKH
        initiator: Address,
        /// Amount to lock, in BTC unless a denomination is given
        #[clap(parse(try_from_str = parse_amount))]
        amount: Amount,
        /// Secret hash of the initiator contract, hex encoded
        secret_hash: SecretHash,
    },
    /// Redeem a counterparty contract with the secret
    Redeem {
        /// Contract, hex encoded
        contract: String,
        /// Transaction funding the contract, hex encoded
        #[clap(parse(try_from_str = parse_tx))]
        contract_tx: Transaction,
        /// Swap secret, hex encoded
        secret: Secret,
    },
    /// Refund an own contract once its locktime is reached
    Refund {
        /// Contract, hex encoded
        contract: String,
        /// Transaction funding the contract, hex encoded
        #[clap(parse(try_from_str = parse_tx))]
        contract_tx: Transaction,
    },
    /// Extract the secret from the redemption of an own contract
    #[clap(name = "extractsecret")]
    ExtractSecret {
        /// Transaction redeeming the contract, hex encoded
        #[clap(parse(try_from_str = parse_tx))]
        redemption_tx: Transaction,
        /// Secret hash of the contract, hex encoded
        secret_hash: SecretHash,
    },
    /// Audit a counterparty contract and its funding transaction
    #[clap(name = "auditcontract")]
    AuditContract {
        /// Contract, hex encoded
        contract: String,
        /// Transaction funding the contract, hex encoded
        #[clap(parse(try_from_str = parse_tx))]
        contract_tx: Transaction,
        /// Minimum amount the contract must lock
        #[clap(long, parse(try_from_str = parse_amount))]
        amount: Option<Amount>,
    },
}

fn parse_tx(s: &str) -> Result<Transaction, consensus::Error> {
    deserialize_hex(s)
}

fn parse_fee_rate(s: &str) -> Result<SatPerKvB, consensus::Error> {
    match u64::from_str(s.trim()) {
        Ok(sats) => Ok(SatPerKvB::from_sat(sats)),
        Err(_) => SatPerKvB::from_str(s),
    }
}

fn decode_contract(s: &str) -> Result<Vec<u8>, Error> {
    Ok(hex::decode(s.trim()).map_err(consensus::Error::from)?)
}

impl Cli {
    fn config(&self) -> Config {
        let network = if self.testnet {
            Network::Testnet
        } else {
            self.network
        };
        let profile = Bitcoin::new(network)
            .with_script_template(self.template)
            .with_hash_algorithm(self.hash)
            .with_locktime_semantics(self.locktime);
        Config {
            server: self.server.clone(),
            rpc_user: self.rpcuser.clone(),
            rpc_pass: self.rpcpass.clone(),
            fee_rate: self.feerate.unwrap_or_default(),
            timeout: Duration::from_secs(self.timeout),
            profile,
        }
    }
}

impl Commands {
    fn into_command(self) -> Result<Command, Error> {
        Ok(match self {
            Self::Initiate {
                participant,
                amount,
            } => Command::Initiate {
                participant,
                amount,
            },
            Self::Participate {
                initiator,
                amount,
                secret_hash,
            } => Command::Participate {
                initiator,
                amount,
                secret_hash,
            },
            Self::Redeem {
                contract,
                contract_tx,
                secret,
            } => Command::Redeem {
                contract: decode_contract(&contract)?,
                contract_tx,
                secret,
            },
            Self::Refund {
                contract,
                contract_tx,
            } => Command::Refund {
                contract: decode_contract(&contract)?,
                contract_tx,
            },
            Self::ExtractSecret {
                redemption_tx,
                secret_hash,
            } => Command::ExtractSecret {
                redemption_tx,
                secret_hash,
            },
            Self::AuditContract {
                contract,
                contract_tx,
                amount,
            } => Command::AuditContract {
                contract: decode_contract(&contract)?,
                contract_tx,
                claimed: amount,
            },
        })
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = cli.config();
    debug!("running with profile {}", config.profile);
    let command = cli.command.into_command()?;

    let client = RpcClient::from_config(&config)?;
    let wallet = RpcWallet::new(
        client.clone(),
        config.profile.bitcoin_network(),
        config.profile.script_template(),
    );
    let orchestrator = Orchestrator::from_config(client, wallet, &config);
    let outcome = orchestrator.run(command)?;
    info!("swap is {}", outcome.state());
    println!("{}", outcome);
    Ok(())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            process::exit(code);
        }
    };

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(err) = run(cli) {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}
