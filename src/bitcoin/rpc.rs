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

//! Chain client and wallet backed by a Bitcoin Core node JSON-RPC server.
//!
//! Every call opens a transport whose timeout is the time left before the deadline of the
//! command, an expired deadline fails the call without contacting the node.

use std::io;

use bitcoin::hash_types::PubkeyHash;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::util::ecdsa::EcdsaSig;
use bitcoin::util::key::PublicKey;
use bitcoin::{Address, Transaction, Txid};
use bitcoincore_rpc::json::AddressType;
use bitcoincore_rpc::jsonrpc;
use bitcoincore_rpc::jsonrpc::simple_http::{self, SimpleHttpTransport};
use bitcoincore_rpc::{Client, RpcApi};

use crate::bitcoin::address::pkh_address;
use crate::bitcoin::ScriptTemplate;
use crate::protocol::Config;
use crate::syncer::{self, ChainClient, ChainTip, Deadline};
use crate::wallet::{self, sign_hash, SigningRequest, Wallet};

/// Invalid address or key, or unknown transaction.
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
/// Wallet error, returned when the wallet does not hold the private key.
const RPC_WALLET_ERROR: i32 = -4;

/// Connection settings to a node RPC server.
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    user: Option<String>,
    pass: Option<String>,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, user: Option<String>, pass: Option<String>) -> Self {
        Self {
            url: url.into(),
            user,
            pass,
        }
    }

    /// Create a client for the server and credentials of the configuration.
    pub fn from_config(config: &Config) -> Result<Self, crate::Error> {
        Ok(Self::new(
            config.rpc_url()?,
            config.rpc_user.clone(),
            config.rpc_pass.clone(),
        ))
    }

    fn client(&self, deadline: Deadline) -> Result<Client, syncer::Error> {
        let timeout = deadline.check()?;
        let mut builder = SimpleHttpTransport::builder()
            .url(&self.url)
            .map_err(|e| syncer::Error::Transport(e.to_string()))?
            .timeout(timeout);
        if let Some(user) = &self.user {
            builder = builder.auth(user.as_str(), self.pass.as_deref());
        }
        Ok(Client::from_jsonrpc(jsonrpc::Client::with_transport(
            builder.build(),
        )))
    }
}

fn rpc_code(err: &bitcoincore_rpc::Error) -> Option<i32> {
    match err {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e)) => Some(e.code),
        _ => None,
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

// Sort node failures into transport problems, worth retrying, and anything else.
fn from_rpc(err: bitcoincore_rpc::Error) -> syncer::Error {
    match err {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Transport(e)) => {
            match e.downcast_ref::<simple_http::Error>() {
                Some(simple_http::Error::SocketError(e)) if is_timeout(e) => syncer::Error::Timeout,
                _ => syncer::Error::Transport(e.to_string()),
            }
        }
        bitcoincore_rpc::Error::Io(e) if is_timeout(&e) => syncer::Error::Timeout,
        bitcoincore_rpc::Error::Io(e) => e.into(),
        err => syncer::Error::new(err),
    }
}

impl ChainClient for RpcClient {
    fn latest_block(&self, deadline: Deadline) -> Result<ChainTip, syncer::Error> {
        let client = self.client(deadline)?;
        let hash = client.get_best_block_hash().map_err(from_rpc)?;
        let header = client.get_block_header_info(&hash).map_err(from_rpc)?;
        // Locktimes are compared to the median time past of the previous blocks, fall back on
        // the block time for nodes not reporting it
        let time = header.median_time.unwrap_or(header.time);
        let tip = ChainTip {
            height: header.height as u64,
            hash,
            time: time as u32,
        };
        debug!("chain tip is {}", tip);
        Ok(tip)
    }

    fn transaction(
        &self,
        txid: &Txid,
        deadline: Deadline,
    ) -> Result<Option<Transaction>, syncer::Error> {
        let client = self.client(deadline)?;
        match client.get_raw_transaction(txid, None) {
            Ok(tx) => Ok(Some(tx)),
            Err(err) if rpc_code(&err) == Some(RPC_INVALID_ADDRESS_OR_KEY) => Ok(None),
            Err(err) => Err(from_rpc(err)),
        }
    }

    fn broadcast(&self, tx: &Transaction, deadline: Deadline) -> Result<Txid, syncer::Error> {
        let client = self.client(deadline)?;
        match client.send_raw_transaction(tx) {
            Ok(txid) => {
                debug!("broadcast transaction {}", txid);
                Ok(txid)
            }
            Err(bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e))) => {
                Err(syncer::Error::Rejected(e.message))
            }
            Err(err) => Err(from_rpc(err)),
        }
    }
}

/// Wallet delegating key management to the node wallet. Signatures are computed locally with the
/// private key exported from the node, which requires a wallet supporting `dumpprivkey`.
pub struct RpcWallet {
    client: RpcClient,
    network: bitcoin::Network,
    template: ScriptTemplate,
    context: Secp256k1<All>,
}

impl RpcWallet {
    pub fn new(client: RpcClient, network: bitcoin::Network, template: ScriptTemplate) -> Self {
        Self {
            client,
            network,
            template,
            context: Secp256k1::new(),
        }
    }

    // The node knows a key under any of its address forms, start with the template one
    fn candidate_addresses(&self, key: &PubkeyHash) -> Vec<Address> {
        let other = match self.template {
            ScriptTemplate::SegwitV0 => ScriptTemplate::Legacy,
            ScriptTemplate::Legacy => ScriptTemplate::SegwitV0,
        };
        vec![
            pkh_address(key, self.template, self.network),
            pkh_address(key, other, self.network),
        ]
    }
}

impl Wallet for RpcWallet {
    fn new_address(&self, deadline: Deadline) -> Result<Address, wallet::Error> {
        let client = self.client.client(deadline)?;
        let address_type = match self.template {
            ScriptTemplate::SegwitV0 => AddressType::Bech32,
            ScriptTemplate::Legacy => AddressType::Legacy,
        };
        let address = client
            .get_new_address(None, Some(address_type))
            .map_err(from_rpc)?;
        debug!("new wallet address {}", address);
        Ok(address)
    }

    fn sign_input(
        &self,
        request: &SigningRequest,
        deadline: Deadline,
    ) -> Result<(PublicKey, EcdsaSig), wallet::Error> {
        let client = self.client.client(deadline)?;
        let mut private_key = None;
        for address in self.candidate_addresses(&request.key) {
            match client.dump_private_key(&address) {
                Ok(key) => {
                    private_key = Some(key);
                    break;
                }
                Err(err)
                    if matches!(
                        rpc_code(&err),
                        Some(RPC_WALLET_ERROR) | Some(RPC_INVALID_ADDRESS_OR_KEY)
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(from_rpc(err).into()),
            }
        }
        let private_key = private_key.ok_or(wallet::Error::MissingKey(request.key))?;

        let public_key = private_key.public_key(&self.context);
        if public_key.pubkey_hash() != request.key {
            return Err(wallet::Error::InvalidKey(format!(
                "node returned the key of {} for {}",
                public_key.pubkey_hash(),
                request.key
            )));
        }
        let sig = sign_hash(&self.context, request.sighash, &private_key.inner)?;
        Ok((public_key, sig))
    }
}
