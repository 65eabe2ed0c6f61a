//! Timelock unit and `OP_CODE` to use in Bitcoin contracts and refund transactions.

use serde::{Deserialize, Serialize};

use crate::consensus;
use crate::syncer::ChainTip;

use std::fmt::Debug;
use std::str::FromStr;

/// Values below this threshold are block heights, values at or above are UNIX timestamps, as
/// interpreted by `OP_CHECKLOCKTIMEVERIFY` and `nLockTime`.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// How a chain profile expresses absolute locktimes.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum LocktimeSemantics {
    /// Locktime is a block height.
    #[display("block height")]
    BlockHeight,
    /// Locktime is a UNIX timestamp in seconds, compared against the median time past.
    #[display("timestamp")]
    Timestamp,
}

impl LocktimeSemantics {
    /// Minimum distance between the chain tip and the locktime of a newly built contract.
    pub fn safety_margin(&self) -> u32 {
        match self {
            Self::BlockHeight => 6,
            Self::Timestamp => 60 * 60,
        }
    }

    /// Maximum distance between the chain tip and the locktime of an audited contract.
    pub fn max_horizon(&self) -> u32 {
        match self {
            Self::BlockHeight => 4320,
            Self::Timestamp => 30 * 24 * 60 * 60,
        }
    }

    /// Current chain position expressed in this semantics.
    pub fn current(&self, tip: &ChainTip) -> u64 {
        match self {
            Self::BlockHeight => tip.height,
            Self::Timestamp => tip.time as u64,
        }
    }
}

impl FromStr for LocktimeSemantics {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "height" | "block" | "blockheight" => Ok(Self::BlockHeight),
            "time" | "timestamp" => Ok(Self::Timestamp),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl FromStr for CltvLocktime {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let x = s
            .parse::<u32>()
            .map_err(|_| consensus::Error::ParseFailed("Failed parsing CLTV locktime"))?;
        Ok(CltvLocktime::new(x))
    }
}

/// An `OP_CLTV` value to use in contracts and in the `nLockTime` field of refund transactions.
/// Any `u32` fits, values above `i32::MAX` are pushed as 5 bytes script numbers.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug, Copy, Display, Serialize, Deserialize)]
#[display("{0}")]
pub struct CltvLocktime(u32);

impl CltvLocktime {
    /// Create a new absolute locktime of given value.
    pub fn new(locktime: u32) -> Self {
        Self(locktime)
    }

    /// Return the value of the check locktime verify.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Semantics of the value, block height or timestamp.
    pub fn semantics(&self) -> LocktimeSemantics {
        if self.0 < LOCKTIME_THRESHOLD {
            LocktimeSemantics::BlockHeight
        } else {
            LocktimeSemantics::Timestamp
        }
    }

    /// Whether the chain has reached the locktime: the tip height for block heights, the tip
    /// median time past for timestamps.
    pub fn is_elapsed(&self, tip: &ChainTip) -> bool {
        self.semantics().current(tip) >= self.0 as u64
    }

    /// Signed distance between the locktime and the tip, in the unit of the locktime semantics.
    pub fn remaining(&self, tip: &ChainTip) -> i64 {
        self.0 as i64 - self.semantics().current(tip) as i64
    }

    /// Return the value of nSequence that enables `nLockTime` without opting in to replacement
    /// semantics beyond the default.
    pub fn enabling_sequence() -> u32 {
        0xffff_fffe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::BlockHash;

    fn tip(height: u64, time: u32) -> ChainTip {
        ChainTip {
            height,
            hash: BlockHash::from_inner([0u8; 32]),
            time,
        }
    }

    #[test]
    fn semantics_from_threshold() {
        assert_eq!(
            CltvLocktime::new(499_999_999).semantics(),
            LocktimeSemantics::BlockHeight
        );
        assert_eq!(
            CltvLocktime::new(LOCKTIME_THRESHOLD).semantics(),
            LocktimeSemantics::Timestamp
        );
        // past 2038
        assert_eq!(
            CltvLocktime::new(u32::MAX).semantics(),
            LocktimeSemantics::Timestamp
        );
    }

    #[test]
    fn elapsed_against_tip() {
        let height = CltvLocktime::new(150);
        assert!(!height.is_elapsed(&tip(149, 1_700_000_000)));
        assert!(height.is_elapsed(&tip(150, 1_700_000_000)));
        assert_eq!(height.remaining(&tip(100, 0)), 50);

        let time = CltvLocktime::new(1_700_000_000);
        assert!(!time.is_elapsed(&tip(1_000_000, 1_699_999_999)));
        assert!(time.is_elapsed(&tip(0, 1_700_000_000)));
        assert!(time.is_elapsed(&tip(0, 1_700_000_001)));
        assert_eq!(time.remaining(&tip(0, 1_700_000_100)), -100);
    }

    #[test]
    fn parse_locktime() {
        assert_eq!(
            CltvLocktime::from_str("1700000000").unwrap().as_u32(),
            1_700_000_000
        );
        assert_eq!(
            CltvLocktime::from_str("4294967295").unwrap().as_u32(),
            u32::MAX
        );
        assert!(CltvLocktime::from_str("4294967296").is_err());
        assert!(CltvLocktime::from_str("-1").is_err());
        assert!(CltvLocktime::from_str("soon").is_err());
    }
}
