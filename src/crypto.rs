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

//! Secret management for the hash lock: generation of the swap secret, hashing under the
//! algorithm of the chain profile and verification of a revealed secret.
//!
//! ```rust
//! use atomicswap::crypto::{self, HashAlgorithm};
//!
//!# fn main() -> Result<(), atomicswap::Error> {
//! let secret = crypto::generate_secret()?;
//! let hash = crypto::hash_secret(&secret, HashAlgorithm::Sha256);
//! assert!(crypto::verify_secret(&secret, &hash));
//!# Ok(())
//!# }
//! ```

use std::fmt::{self, Debug};
use std::str::FromStr;

use bitcoin::hashes::{ripemd160, Hash};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::consensus::{self, CanonicalBytes};
use crate::Error;

/// Size in bytes of a swap secret. The contract enforces it with `OP_SIZE`.
pub const SECRET_SIZE: usize = 32;

/// Hash function used by the hash lock of the contract.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// `OP_SHA256`, 32 bytes digest.
    #[display("sha256")]
    Sha256,
    /// `OP_RIPEMD160`, 20 bytes digest.
    #[display("ripemd160")]
    Ripemd160,
}

impl HashAlgorithm {
    /// Length in bytes of the digest produced by the algorithm.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Ripemd160 => 20,
        }
    }

    /// Hash arbitrary data with the algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Ripemd160 => ripemd160::Hash::hash(data).into_inner().to_vec(),
        }
    }

    /// Infer the algorithm from the length of a digest.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Sha256),
            20 => Some(Self::Ripemd160),
            _ => None,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" | "SHA256" | "Sha256" => Ok(Self::Sha256),
            "ripemd160" | "RIPEMD160" | "Ripemd160" => Ok(Self::Ripemd160),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// The 32 bytes preimage unlocking the redeem branch of the contracts.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_SIZE]);

impl Secret {
    /// Wrap raw bytes as a secret.
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Return the raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

// Printing the secret is explicit, only through Display.
impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Secret {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        consensus::deserialize_hex(s)
    }
}

impl CanonicalBytes for Secret {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        let mut secret = [0u8; SECRET_SIZE];
        if bytes.len() != SECRET_SIZE {
            return Err(consensus::Error::ParseFailed("Secret must be 32 bytes"));
        }
        secret.copy_from_slice(bytes);
        Ok(Self(secret))
    }
}

/// Digest of a [`Secret`], committed in the contract hash lock.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SecretHash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl SecretHash {
    /// Create a secret hash from a digest, fails if the length does not match the algorithm.
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self, consensus::Error> {
        if digest.len() != algorithm.digest_len() {
            return Err(consensus::Error::ParseFailed(
                "Digest length does not match the hash algorithm",
            ));
        }
        Ok(Self { algorithm, digest })
    }

    /// The algorithm used to produce the digest.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.digest))
    }
}

impl FromStr for SecretHash {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        consensus::deserialize_hex(s)
    }
}

impl CanonicalBytes for SecretHash {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.digest.clone()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        let algorithm = HashAlgorithm::from_digest_len(bytes.len()).ok_or(
            consensus::Error::ParseFailed("Secret hash must be 32 or 20 bytes"),
        )?;
        Self::new(algorithm, bytes.to_vec())
    }
}

impl Serialize for SecretHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SecretHash {
    fn deserialize<D>(deserializer: D) -> Result<SecretHash, D::Error>
    where
        D: Deserializer<'de>,
    {
        SecretHash::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

/// Draw a fresh secret from the operating system random source. A failing source is fatal.
pub fn generate_secret() -> Result<Secret, Error> {
    let mut secret = [0u8; SECRET_SIZE];
    OsRng
        .try_fill_bytes(&mut secret)
        .map_err(Error::SecretGeneration)?;
    Ok(Secret(secret))
}

/// Hash a secret with the given algorithm.
pub fn hash_secret(secret: &Secret, algorithm: HashAlgorithm) -> SecretHash {
    SecretHash {
        algorithm,
        digest: algorithm.digest(&secret.0),
    }
}

/// Check that the secret hashes to the expected value. Comparison runs in constant time with
/// respect to the digest content.
pub fn verify_secret(secret: &Secret, expected: &SecretHash) -> bool {
    let computed = expected.algorithm.digest(&secret.0);
    computed.len() == expected.digest.len()
        && computed
            .iter()
            .zip(expected.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
