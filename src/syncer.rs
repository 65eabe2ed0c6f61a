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

//! Interface used by the swap engine to read the chain state and publish transactions. Every call
//! is bounded by a [`Deadline`].

use std::error;
use std::time::{Duration, Instant};

use bitcoin::{BlockHash, Transaction, Txid};
use thiserror::Error;

/// Errors encountered when talking to a chain backend. [`Self::Other`] can carry out errors from
/// external sources.
#[derive(Error, Debug)]
pub enum Error {
    /// The deadline of the call elapsed before the backend answered.
    #[error("Deadline elapsed before the chain backend answered")]
    Timeout,
    /// The backend could not be reached or answered garbage.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The backend refused a transaction, the reason is reported verbatim.
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    /// Any syncer error not part of this list.
    #[error("Syncer error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new syncer error of type other with an arbitrary payload.
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

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Transport(err.to_string())
    }
}

/// Point in time after which an external call must be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline expiring after the given duration from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Fails with [`Error::Timeout`] if the deadline is expired, return the time left otherwise.
    pub fn check(&self) -> Result<Duration, Error> {
        let remaining = self.remaining();
        if remaining == Duration::ZERO {
            return Err(Error::Timeout);
        }
        Ok(remaining)
    }
}

/// The best block of the chain as seen by the backend. `time` is the median time past, the
/// value `nLockTime` timestamps are compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("block {height} ({hash}), median time {time}")]
pub struct ChainTip {
    pub height: u64,
    pub hash: BlockHash,
    pub time: u32,
}

/// Read and publish access to a chain. Implementations must honour the deadline: once it is
/// expired the call fails with [`Error::Timeout`].
pub trait ChainClient {
    /// Return the current chain tip.
    fn latest_block(&self, deadline: Deadline) -> Result<ChainTip, Error>;

    /// Fetch a transaction by id, `None` if the backend does not know it.
    fn transaction(&self, txid: &Txid, deadline: Deadline) -> Result<Option<Transaction>, Error>;

    /// Publish a transaction and return its id.
    fn broadcast(&self, tx: &Transaction, deadline: Deadline) -> Result<Txid, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_expiry() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert!(!deadline.is_expired());
        assert!(deadline.check().is_ok());
        assert!(deadline.remaining() <= Duration::from_secs(10));

        let expired = Deadline::after(Duration::ZERO);
        assert!(expired.is_expired());
        assert!(matches!(expired.check(), Err(Error::Timeout)));
    }
}
