//! Concentrated-liquidity pool price math.
//!
//! A pool reports its price as `sqrtPriceX96 = sqrt(token1 / token0) * 2^96`
//! in raw token units. All intermediate math runs on 512-bit integers and
//! only the final result is converted to `f64`.

use alloy::primitives::{U256, U512};
use serde::{Deserialize, Serialize};

/// Fixed-point digits kept before the final float conversion.
const PRECISION: u32 = 18;

/// Token decimals and which side of the pair is the quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOrientation {
    pub token0_decimals: u8,
    pub token1_decimals: u8,
    /// `true` when token0 is the quote currency (e.g. USDC/WETH pools),
    /// so the price of token1 is the inverse of the raw pool ratio.
    pub quote_is_token0: bool,
}

fn pow10(exp: u32) -> U512 {
    U512::from(10u8).pow(U512::from(exp))
}

/// Convert `sqrtPriceX96` into the base asset's price in quote units.
///
/// Returns `None` for a zero price or a result too large to represent.
pub fn price_from_sqrt_x96(sqrt_price_x96: U256, orientation: PoolOrientation) -> Option<f64> {
    let sqrt = U512::from_be_slice(&sqrt_price_x96.to_be_bytes::<32>());
    let squared = sqrt.checked_mul(sqrt)?;
    if squared.is_zero() {
        return None;
    }
    let q192: U512 = U512::from(1u8) << 192;
    let d0 = u32::from(orientation.token0_decimals);
    let d1 = u32::from(orientation.token1_decimals);

    // price * 10^PRECISION = num / den
    let (num, den) = if orientation.quote_is_token0 {
        (
            q192.checked_mul(pow10(PRECISION + d1))?,
            squared.checked_mul(pow10(d0))?,
        )
    } else {
        (
            squared.checked_mul(pow10(PRECISION + d0))?,
            q192.checked_mul(pow10(d1))?,
        )
    };

    let scaled = u128::try_from(num.checked_div(den)?).ok()?;
    let unit = 10u128.pow(PRECISION);
    let price = (scaled / unit) as f64 + (scaled % unit) as f64 / unit as f64;

    (price.is_finite() && price > 0.0).then_some(price)
}
