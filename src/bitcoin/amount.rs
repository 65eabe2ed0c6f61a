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

use crate::consensus;
use bitcoin::util::amount::Denomination;
use bitcoin::Amount;

/// Parse an amount given on the command line. A bare number is read in BTC, a denominated value
/// such as `1500 satoshi` is read in its own unit. Zero is rejected.
pub fn parse_amount(s: &str) -> Result<Amount, consensus::Error> {
    let s = s.trim();
    let amount = if s.contains(' ') {
        s.parse::<Amount>().map_err(consensus::Error::new)?
    } else {
        Amount::from_str_in(s, Denomination::Bitcoin).map_err(consensus::Error::new)?
    };
    if amount == Amount::ZERO {
        return Err(consensus::Error::ParseFailed("Amount must be positive"));
    }
    Ok(amount)
}
