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

//! Signing service used to authorize contract spends. The swap engine never holds private keys:
//! it hands a [`SigningRequest`] to a [`Wallet`] and receives the public key and signature to
//! place on the spending input.

use std::cell::RefCell;
use std::error;

use bitcoin::blockdata::transaction::EcdsaSighashType;
use bitcoin::hash_types::PubkeyHash;
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::secp256k1::{ecdsa::Signature, All, Message, Secp256k1, SecretKey};
use bitcoin::util::ecdsa::EcdsaSig;
use bitcoin::util::key::{PrivateKey, PublicKey};
use bitcoin::{Address, Script, Transaction};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::bitcoin::address::pkh_address;
use crate::bitcoin::ScriptTemplate;
use crate::syncer::{self, Deadline};

/// List of errors a signing service can return.
#[derive(Error, Debug)]
pub enum Error {
    /// The wallet does not control the key the contract commits to.
    #[error("No key in the wallet for public key hash {0}")]
    MissingKey(PubkeyHash),
    /// The key material is not usable.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    /// The wallet backend failed to answer.
    #[error("Wallet backend error: {0}")]
    Syncer(#[from] syncer::Error),
    /// Any wallet error not part of this list.
    #[error("Wallet error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new wallet error of type [`Self::Other`] with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// If this [`enum@Error`] was constructed via [`new`] then this function will return [`Some`],
    /// otherwise it will return [`None`].
    ///
    /// [`new`]: Error::new
    ///
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

/// Everything a signer needs to authorize one contract input. `sighash` is already computed with
/// the rules of the contract output template, `key` is the public key hash the contract commits
/// to for the spending branch.
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub transaction: &'a Transaction,
    pub input_index: usize,
    pub script_code: &'a Script,
    pub value: u64,
    pub sighash: Sha256dHash,
    pub key: PubkeyHash,
}

/// A signing service holding the private keys of one party.
pub trait Wallet {
    /// Return a fresh address controlled by the wallet.
    fn new_address(&self, deadline: Deadline) -> Result<Address, Error>;

    /// Sign the request with the key whose hash is `request.key` and return its public key along
    /// with the signature.
    fn sign_input(
        &self,
        request: &SigningRequest,
        deadline: Deadline,
    ) -> Result<(PublicKey, EcdsaSig), Error>;
}

/// Computes the ECDSA signature of the given hash. Assumes that the hash is correctly computed.
pub fn sign_hash(
    context: &Secp256k1<All>,
    sighash: Sha256dHash,
    secret_key: &SecretKey,
) -> Result<EcdsaSig, Error> {
    // Makes signature.
    let msg = Message::from_slice(&sighash[..]).map_err(Error::new)?;
    let mut sig: Signature = context.sign_ecdsa(&msg, secret_key);
    sig.normalize_s();
    Ok(EcdsaSig {
        sig,
        hash_ty: EcdsaSighashType::All,
    })
}

/// In-memory wallet, keys are generated from the operating system random source and never leave
/// the process.
pub struct KeyStore {
    network: bitcoin::Network,
    template: ScriptTemplate,
    keys: RefCell<Vec<PrivateKey>>,
    context: Secp256k1<All>,
}

impl KeyStore {
    /// Create an empty key store producing addresses of the template kind on the network.
    pub fn new(network: bitcoin::Network, template: ScriptTemplate) -> Self {
        Self {
            network,
            template,
            keys: RefCell::new(vec![]),
            context: Secp256k1::new(),
        }
    }

    /// Add an existing key and return its address.
    pub fn import(&self, key: PrivateKey) -> Address {
        let address = self.address_of(&key);
        self.keys.borrow_mut().push(key);
        address
    }

    /// Generate a new key and return its address.
    pub fn generate(&self) -> Result<Address, Error> {
        let mut bytes = [0u8; 32];
        // Out of range values are astronomically rare, draw again if it happens
        let secret_key = loop {
            OsRng.try_fill_bytes(&mut bytes).map_err(Error::new)?;
            if let Ok(key) = SecretKey::from_slice(&bytes) {
                break key;
            }
        };
        Ok(self.import(PrivateKey::new(secret_key, self.network)))
    }

    fn address_of(&self, key: &PrivateKey) -> Address {
        let pkh = key.public_key(&self.context).pubkey_hash();
        pkh_address(&pkh, self.template, self.network)
    }
}

impl Wallet for KeyStore {
    fn new_address(&self, _deadline: Deadline) -> Result<Address, Error> {
        self.generate()
    }

    fn sign_input(
        &self,
        request: &SigningRequest,
        _deadline: Deadline,
    ) -> Result<(PublicKey, EcdsaSig), Error> {
        let keys = self.keys.borrow();
        let key = keys
            .iter()
            .find(|key| key.public_key(&self.context).pubkey_hash() == request.key)
            .ok_or(Error::MissingKey(request.key))?;
        let sig = sign_hash(&self.context, request.sighash, &key.inner)?;
        Ok((key.public_key(&self.context), sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use std::time::Duration;

    use crate::bitcoin::address::pubkey_hash;

    #[test]
    fn sign_with_known_key() {
        let wallet = KeyStore::new(bitcoin::Network::Regtest, ScriptTemplate::SegwitV0);
        let deadline = Deadline::after(Duration::from_secs(1));
        let address = wallet.new_address(deadline).unwrap();
        let key = pubkey_hash(&address, bitcoin::Network::Regtest).unwrap();

        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![],
            output: vec![],
        };
        let script = Script::new();
        let request = SigningRequest {
            transaction: &tx,
            input_index: 0,
            script_code: &script,
            value: 0,
            sighash: Sha256dHash::hash(b"sighash"),
            key,
        };
        let (pubkey, sig) = wallet.sign_input(&request, deadline).unwrap();
        assert_eq!(pubkey.pubkey_hash(), key);
        assert_eq!(sig.hash_ty, EcdsaSighashType::All);

        let msg = Message::from_slice(&request.sighash[..]).unwrap();
        assert!(Secp256k1::verification_only()
            .verify_ecdsa(&msg, &sig.sig, &pubkey.inner)
            .is_ok());
    }

    #[test]
    fn unknown_key_is_missing() {
        let wallet = KeyStore::new(bitcoin::Network::Regtest, ScriptTemplate::Legacy);
        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![],
            output: vec![],
        };
        let script = Script::new();
        let request = SigningRequest {
            transaction: &tx,
            input_index: 0,
            script_code: &script,
            value: 0,
            sighash: Sha256dHash::hash(b"sighash"),
            key: PubkeyHash::from_inner([0x22; 20]),
        };
        let res = wallet.sign_input(&request, Deadline::after(Duration::from_secs(1)));
        assert!(matches!(res, Err(Error::MissingKey(_))));
    }
}
