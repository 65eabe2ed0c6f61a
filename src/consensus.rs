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

//! Canonical encoding used to move swap data (contracts, secrets, transactions) between the
//! command line and the library.
//!
//! Implementation on blockchain foreign types with [`CanonicalBytes`] must follow the strict
//! consensus encoding from the blockchain itself. Everything the tool prints or reads back is the
//! hex encoding of these canonical bytes.

use hex::{decode as hex_decode, encode as hex_encode};
use thiserror::Error;

use std::error;

/// Encoding and decoding errors and data transformation errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The type is not defined in the consensus.
    #[error("Unknown consensus type")]
    UnknownType,
    /// The type is not the one expected.
    #[error("Type mismatch, the given type does not match the expected one")]
    TypeMismatch,
    /// A generic parsing error.
    #[error("Parsing error: {0}")]
    ParseFailed(&'static str),
    /// The hexadecimal input is not valid.
    #[error("Invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Any Consensus error not part of this list.
    #[error("Consensus error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new error of type [`Self::Other`] with an arbitrary payload. Useful to carry
    /// lower-level errors.
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

/// Data represented in a canonical bytes format. The implementer **MUST** use the strict encoding
/// dictated by the blockchain consensus without any length prefix.
pub trait CanonicalBytes {
    /// Returns the canonical bytes representation of the element.
    fn as_canonical_bytes(&self) -> Vec<u8>;

    /// Parse a supposedly canonical bytes representation of an element and return it, return an
    /// error if not canonical.
    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized;
}

/// Encode an object into a hex-encoded string of its canonical bytes.
pub fn serialize_hex<T: CanonicalBytes + ?Sized>(data: &T) -> String {
    hex_encode(data.as_canonical_bytes())
}

/// Decode an object from a hex-encoded string of its canonical bytes. Surrounding whitespace is
/// ignored, as the value usually comes straight from a command line or a copy-paste.
pub fn deserialize_hex<T: CanonicalBytes>(data: &str) -> Result<T, Error> {
    let bytes = hex_decode(data.trim())?;
    T::from_canonical_bytes(&bytes)
}

impl CanonicalBytes for bitcoin::Transaction {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(self)
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized,
    {
        bitcoin::consensus::encode::deserialize(bytes).map_err(Error::new)
    }
}

impl CanonicalBytes for bitcoin::Script {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.to_bytes()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized,
    {
        Ok(bitcoin::Script::from(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_hex_round_trip() {
        let script = bitcoin::Script::from(vec![0x63, 0x67, 0x68]);
        assert_eq!(serialize_hex(&script), "636768");
        let decoded: bitcoin::Script = deserialize_hex(" 636768\n").unwrap();
        assert_eq!(decoded, script);
    }

    #[test]
    fn invalid_hex_is_rejected() {
        let res = deserialize_hex::<bitcoin::Script>("zz");
        assert!(matches!(res, Err(Error::Hex(_))));
    }

    #[test]
    fn truncated_transaction_is_rejected() {
        let res = deserialize_hex::<bitcoin::Transaction>("0200000001");
        assert!(matches!(res, Err(Error::Other(_))));
    }
}
