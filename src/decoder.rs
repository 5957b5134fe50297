//! Swap decoder & slippage (§4.1).
//!
//! Parses one raw concentrated-liquidity swap log into a canonical
//! `SwapEvent`, deriving direction and slippage from the decoded amounts and
//! sqrt-prices. The "before" price is supplied by the caller — the cache
//! keeps the pool's last observed `sqrt_price_after` around for this
//! purpose, and passes it back in on every decode.

use ethabi::RawLog;
use ethers::types::{Address, H256, U256};
use web3::types::Log;

use crate::abi::swap_event;
use crate::errors::DecodeError;
use crate::types::SwapEvent;

/// Decode one `Swap` log into a `SwapEvent`.
///
/// `sqrt_price_before` is the pool's previously observed `sqrt_price_after`
/// (or equal to this log's own `sqrt_price_after` for a pool's first-ever
/// swap, which makes slippage 0 by construction).
pub fn decode_swap_log(log: &Log, sqrt_price_before: U256) -> Result<SwapEvent, DecodeError> {
    if log.topics.is_empty() {
        return Err(DecodeError::MissingTopics);
    }
    let expected_sig = swap_event().signature();
    let got_sig = H256::from_slice(log.topics[0].as_bytes());
    if got_sig != expected_sig {
        return Err(DecodeError::UnknownSignature(got_sig));
    }

    let raw_log = RawLog {
        topics: log.topics.iter().map(|t| H256::from_slice(t.as_bytes())).collect(),
        data: log.data.0.clone(),
    };
    let parsed = swap_event()
        .parse_log(raw_log)
        .map_err(|e| DecodeError::AbiParsing(e.to_string()))?;

    let param = |name: &str| -> Result<ethabi::Token, DecodeError> {
        parsed
            .params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.clone())
            .ok_or_else(|| DecodeError::AbiParsing(format!("missing field {name}")))
    };

    let amount0_raw = param("amount0")?
        .into_int()
        .ok_or_else(|| DecodeError::AbiParsing("amount0 not an int".into()))?;
    let amount1_raw = param("amount1")?
        .into_int()
        .ok_or_else(|| DecodeError::AbiParsing("amount1 not an int".into()))?;
    let sqrt_price_after = param("sqrtPriceX96")?
        .into_uint()
        .ok_or_else(|| DecodeError::AbiParsing("sqrtPriceX96 not a uint".into()))?;
    let tick_raw = param("tick")?
        .into_int()
        .ok_or_else(|| DecodeError::AbiParsing("tick not an int".into()))?;

    let (amount0_negative, amount0) = decode_signed_256(amount0_raw);
    let (amount1_negative, amount1) = decode_signed_256(amount1_raw);
    let tick = safe_u256_to_tick(tick_raw);

    let zero_for_one = amount0_negative;

    let (effective_slippage_pct, price_impact_pct) =
        compute_slippage(amount0, amount1, sqrt_price_before, sqrt_price_after);

    let block_number = log
        .block_number
        .map(|b| b.as_u64())
        .ok_or_else(|| DecodeError::AbiParsing("log missing block_number".into()))?;
    let log_index = log
        .log_index
        .map(|i| i.as_u64())
        .ok_or_else(|| DecodeError::AbiParsing("log missing log_index".into()))?;
    let tx_hash = log
        .transaction_hash
        .map(|h| H256::from_slice(h.as_bytes()))
        .ok_or_else(|| DecodeError::AbiParsing("log missing transaction_hash".into()))?;
    let pool_address = Address::from_slice(log.address.as_bytes());

    Ok(SwapEvent {
        pool_address,
        block_number,
        tx_hash,
        log_index,
        timestamp_unix_s: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        amount0,
        amount0_negative,
        amount1,
        amount1_negative,
        sqrt_price_before,
        sqrt_price_after,
        tick,
        zero_for_one,
        effective_slippage_pct,
        price_impact_pct,
    })
}

/// Split a raw two's-complement 256-bit value into (is_negative, magnitude).
/// Never narrows with an `as` cast: the sign bit is read directly and the
/// magnitude is recovered by negating in place.
fn decode_signed_256(raw: U256) -> (bool, U256) {
    if raw.bit(255) {
        let magnitude = (!raw).overflowing_add(U256::one()).0;
        (true, magnitude)
    } else {
        (false, raw)
    }
}

const MIN_TICK: i32 = -887_272;
const MAX_TICK: i32 = 887_272;

/// Convert a raw `int24` (decoded by ethabi as a 256-bit two's-complement
/// value) into a clamped `i32`, never via a narrowing `as` cast on the raw
/// value.
fn safe_u256_to_tick(value: U256) -> i32 {
    if value.bit(255) {
        let magnitude = (!value).overflowing_add(U256::one()).0;
        let tick = -(magnitude.low_u64() as i64);
        tick.clamp(MIN_TICK as i64, MAX_TICK as i64) as i32
    } else {
        let tick = value.low_u64() as i64;
        tick.clamp(MIN_TICK as i64, MAX_TICK as i64) as i32
    }
}

/// Widen a `U256` to `f64`, limb by limb. Used only where the spec
/// explicitly permits widening to double precision before dividing (§4.1,
/// §9) rather than requiring exact big-integer division throughout.
fn u256_to_f64(value: U256) -> f64 {
    let limbs = value.0;
    let mut result = limbs[3] as f64;
    for i in (0..3).rev() {
        result = result * 18_446_744_073_709_551_616.0 /* 2^64 */ + limbs[i] as f64;
    }
    result
}

/// Slippage algorithm (§4.1). Any arithmetic exception (division by zero,
/// non-finite result) yields `(0.0, 0.0)` — failure is non-fatal here.
fn compute_slippage(
    amount0: U256,
    amount1: U256,
    sqrt_price_before: U256,
    sqrt_price_after: U256,
) -> (f64, f64) {
    let abs_amount0 = u256_to_f64(amount0);
    let abs_amount1 = u256_to_f64(amount1);
    let effective_price = if abs_amount0 == 0.0 || abs_amount1 == 0.0 {
        0.0
    } else {
        abs_amount1 / abs_amount0
    };

    let sqrt_before_f = u256_to_f64(sqrt_price_before);
    let sqrt_after_f = u256_to_f64(sqrt_price_after);
    let two_pow_192 = 6_277_101_735_386_680_763_835_789_423_207_666_416_102_355_444_464_034_512_896.0_f64;

    let price_before = (sqrt_before_f * sqrt_before_f) / two_pow_192;
    let price_after = (sqrt_after_f * sqrt_after_f) / two_pow_192;

    let (slippage, impact) = if price_before > 0.0 {
        let slippage = 100.0 * (effective_price - price_before).abs() / price_before;
        let impact =
            100.0 * (price_after.powi(2) - price_before.powi(2)).abs() / price_before.powi(2);
        (slippage.min(100.0), impact.min(100.0))
    } else {
        (0.0, 0.0)
    };

    // Any non-finite intermediate (NaN/Inf from an unexpected edge case)
    // degrades to zero rather than propagating — decode failures here must
    // stay non-fatal for ingestion.
    match (slippage.is_finite(), impact.is_finite()) {
        (true, true) => (slippage, impact),
        _ => (0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_signed_256_positive() {
        let (neg, mag) = decode_signed_256(U256::from(42));
        assert!(!neg);
        assert_eq!(mag, U256::from(42));
    }

    #[test]
    fn test_decode_signed_256_negative() {
        // -1 as two's complement is all bits set.
        let raw = U256::MAX;
        let (neg, mag) = decode_signed_256(raw);
        assert!(neg);
        assert_eq!(mag, U256::one());
    }

    #[test]
    fn test_safe_u256_to_tick_positive() {
        assert_eq!(safe_u256_to_tick(U256::from(100)), 100);
    }

    #[test]
    fn test_safe_u256_to_tick_negative() {
        let neg_100 = (!U256::from(100)).overflowing_add(U256::one()).0;
        assert_eq!(safe_u256_to_tick(neg_100), -100);
    }

    #[test]
    fn test_safe_u256_to_tick_clamped() {
        let way_out_of_range = U256::from(10_000_000u64);
        assert_eq!(safe_u256_to_tick(way_out_of_range), MAX_TICK);
    }

    #[test]
    fn test_compute_slippage_first_swap_is_zero() {
        let sqrt_price = U256::from(1u64) << 96; // price == 1.0
        let (slippage, impact) = compute_slippage(
            U256::from(1_000_000u64),
            U256::from(1_000_000u64),
            sqrt_price,
            sqrt_price,
        );
        assert_eq!(slippage, 0.0);
        assert_eq!(impact, 0.0);
    }

    #[test]
    fn test_compute_slippage_bounded_to_100() {
        let sqrt_before = U256::from(1u64) << 96;
        let sqrt_after = sqrt_before * U256::from(100u64);
        let (slippage, impact) = compute_slippage(
            U256::from(1u64),
            U256::from(1_000_000_000u64),
            sqrt_before,
            sqrt_after,
        );
        assert!(slippage <= 100.0);
        assert!(impact <= 100.0);
    }

    #[test]
    fn test_compute_slippage_zero_price_before_is_safe() {
        let (slippage, impact) = compute_slippage(
            U256::from(1u64),
            U256::from(1u64),
            U256::zero(),
            U256::from(1u64) << 96,
        );
        assert_eq!(slippage, 0.0);
        assert_eq!(impact, 0.0);
    }
}
