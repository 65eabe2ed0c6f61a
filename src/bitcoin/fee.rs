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

//! Transaction fee unit type and implementation. Defines the [`SatPerKvB`] unit used when
//! setting the fee on the redeem and refund transactions.
//!
//! ```rust
//! use atomicswap::bitcoin::fee::SatPerKvB;
//!
//!# fn main() -> Result<(), atomicswap::consensus::Error> {
//! // Parse a Bitcoin amount suffixed with '/kvB'
//! let rate = "100 satoshi/kvB".parse::<SatPerKvB>()?;
//! // ...also work with any other valid Bitcoin denomination
//! let rate = "0.000001 BTC/kvB".parse::<SatPerKvB>()?;
//!
//! // Always displayed as 'statoshi/kvB'
//! assert_eq!("100 satoshi/kvB", format!("{}", rate));
//!# Ok(())
//!# }
//! ```

use bitcoin::blockdata::script::Builder;
use bitcoin::blockdata::transaction::Transaction;
use bitcoin::blockdata::witness::Witness;
use bitcoin::util::amount::Denomination;
use bitcoin::{Amount, Script};

use crate::bitcoin::ScriptTemplate;
use crate::consensus;
use crate::Error;

use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The unit used to mesure a quantity, or weight, for a Bitcoin transaction. This represent a
/// 1'000 of virtual Bytes.
pub const WEIGHT_UNIT: &str = "kvB";

/// Smallest output value relayed by default policy for the output types we create.
pub const DUST_LIMIT: u64 = 546;

/// An amount of Bitcoin (internally in satoshis) representing the number of satoshis per
/// thousand virtual bytes a transaction must use for its fee.
#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Hash, Eq, Display)]
#[display(display_sats_per_vbyte)]
pub struct SatPerKvB(Amount);

fn display_sats_per_vbyte(rate: &SatPerKvB) -> String {
    format!(
        "{}/{}",
        rate.as_native_unit()
            .to_string_with_denomination(Denomination::Satoshi),
        WEIGHT_UNIT
    )
}

impl SatPerKvB {
    /// Create a fee quantity per kilo virtual byte of given satoshis.
    pub fn from_sat(satoshis: u64) -> Self {
        SatPerKvB(Amount::from_sat(satoshis))
    }

    /// Return the number of satoshis per kilo virtual byte to use for calculating the fee.
    pub fn as_sat(&self) -> u64 {
        self.0.as_sat()
    }

    /// Create a fee quantity per kilo virtual byte of given `bitcoin` crate amount.
    pub fn from_native_unit(amount: Amount) -> Self {
        SatPerKvB(amount)
    }

    /// Return the number of bitcoins per kilo virtual byte to use for calculating the fee as the
    /// native `bitcoin` crate amount.
    pub fn as_native_unit(&self) -> Amount {
        self.0
    }

    /// Fee to pay for the given virtual size, rounded to the nearest satoshi.
    pub fn fee_for_vsize(&self, vsize: usize) -> Amount {
        let fee_rate = self.as_native_unit().to_float_in(Denomination::Satoshi);
        let fee_amount = fee_rate / 1000f64 * vsize as f64;
        Amount::from_sat(fee_amount.round() as u64)
    }
}

impl Default for SatPerKvB {
    fn default() -> Self {
        Self::from_sat(1000)
    }
}

impl Serialize for SatPerKvB {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{}", self).as_ref())
    }
}

impl<'de> Deserialize<'de> for SatPerKvB {
    fn deserialize<D>(deserializer: D) -> Result<SatPerKvB, D::Error>
    where
        D: Deserializer<'de>,
    {
        SatPerKvB::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

impl FromStr for SatPerKvB {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split('/').collect::<Vec<&str>>();
        if parts.len() != 2 {
            return Err(consensus::Error::ParseFailed(
                "sat/kvB format is not respected",
            ));
        }
        let amount = parts[0].parse::<Amount>().map_err(consensus::Error::new)?;
        match parts[1] {
            WEIGHT_UNIT => Ok(Self(amount)),
            _ => Err(consensus::Error::ParseFailed("Weight unit parse failed")),
        }
    }
}

fn upper_bound_simulated_stack(contract: &Script) -> Vec<Vec<u8>> {
    // Simulate the biggest of the two spends: the redeem branch carries a signature, a
    // compressed public key, the 32 bytes secret and a true opcode, the refund branch has no
    // secret
    vec![
        vec![0; 73],
        vec![0; 33],
        vec![0; 32],
        vec![1],
        contract.to_bytes(),
    ]
}

/// Calculates and sets the fee on a single input, single output spend of a contract paying
/// `input_value`, and return the fee set. The fee is computed on an upper bound of the final
/// virtual size, with a simulated witness or script signature.
pub fn set_fee(
    tx: &mut Transaction,
    input_value: Amount,
    contract: &Script,
    template: ScriptTemplate,
    fee_rate: SatPerKvB,
) -> Result<Amount, Error> {
    if tx.input.len() != 1 || tx.output.len() != 1 {
        return Err(Error::InvalidParameter(format!(
            "fee can only be set on a one input one output transaction, found {} inputs and {} outputs",
            tx.input.len(),
            tx.output.len()
        )));
    }

    // simulate spending data
    let stack = upper_bound_simulated_stack(contract);
    match template {
        ScriptTemplate::SegwitV0 => tx.input[0].witness = Witness::from_vec(stack),
        ScriptTemplate::Legacy => {
            tx.input[0].script_sig = stack
                .iter()
                .fold(Builder::new(), |builder, item| builder.push_slice(item))
                .into_script()
        }
    }
    let vsize = tx.vsize();
    // remove spending data
    tx.input[0].witness = Witness::new();
    tx.input[0].script_sig = Script::new();

    let fee_amount = fee_rate.fee_for_vsize(vsize);
    let output_value = input_value
        .checked_sub(fee_amount)
        .filter(|value| value.as_sat() >= DUST_LIMIT)
        .ok_or_else(|| {
            Error::InvalidParameter(format!(
                "fee of {} at {} leaves no spendable output from the locked {}",
                fee_amount, fee_rate, input_value
            ))
        })?;

    // Apply the fee on the output
    tx.output[0].value = output_value.as_sat();

    // Return the fee amount set in native blockchain asset unit
    Ok(fee_amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::transaction::{OutPoint, TxIn, TxOut};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SerdeTest {
        fee: SatPerKvB,
    }

    fn spend() -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence: 0xffff_ffff,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 0,
                script_pubkey: Script::new(),
            }],
        }
    }

    #[test]
    fn parse_sats_per_vbyte() {
        for s in [
            "0.0001 BTC/kvB",
            "100 satoshi/kvB",
            "100 satoshis/kvB",
            "10 satoshi/kvB",
            "1 satoshi/kvB",
        ]
        .iter()
        {
            let parse = SatPerKvB::from_str(s);
            assert!(parse.is_ok());
        }
        // MUST fail
        for s in ["1 satoshi", "100 kvB"].iter() {
            let parse = SatPerKvB::from_str(s);
            assert!(parse.is_err());
        }
    }

    #[test]
    fn display_sats_per_vbyte() {
        let fee_rate = SatPerKvB::from_sat(100);
        assert_eq!(format!("{}", fee_rate), "100 satoshi/kvB".to_string());
        assert_eq!(SatPerKvB::default().as_sat(), 1000);
    }

    #[test]
    fn serialize_fee_rate_in_yaml() {
        let fee_rate = SerdeTest {
            fee: SatPerKvB::from_sat(10),
        };
        let s = serde_yaml::to_string(&fee_rate).expect("Encode fee rate in yaml");
        assert_eq!("---\nfee: 10 satoshi/kvB\n", s);
    }

    #[test]
    fn deserialize_fee_rate_in_yaml() {
        let s = "---\nfee: 10 satoshi/kvB\n";
        let fee_rate = serde_yaml::from_str(&s).expect("Decode fee rate from yaml");
        assert_eq!(
            SerdeTest {
                fee: SatPerKvB::from_sat(10)
            },
            fee_rate
        );
    }

    #[test]
    fn legacy_spend_pays_more_than_segwit() {
        let contract = Script::from(vec![0x51; 97]);
        let rate = SatPerKvB::from_sat(1000);
        let value = Amount::from_sat(100_000);

        let mut segwit = spend();
        let segwit_fee =
            set_fee(&mut segwit, value, &contract, ScriptTemplate::SegwitV0, rate).unwrap();
        let mut legacy = spend();
        let legacy_fee =
            set_fee(&mut legacy, value, &contract, ScriptTemplate::Legacy, rate).unwrap();

        assert!(legacy_fee > segwit_fee);
        assert_eq!(segwit.output[0].value, (value - segwit_fee).as_sat());
        assert!(segwit.input[0].witness.is_empty());
        assert!(legacy.input[0].script_sig.is_empty());
    }

    #[test]
    fn fee_above_value_is_rejected() {
        let contract = Script::from(vec![0x51; 97]);
        let mut tx = spend();
        let res = set_fee(
            &mut tx,
            Amount::from_sat(1_000),
            &contract,
            ScriptTemplate::SegwitV0,
            SatPerKvB::from_sat(100_000),
        );
        assert!(matches!(res, Err(Error::InvalidParameter(_))));
    }
}
