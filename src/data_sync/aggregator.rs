use crate::data_sync::rpc::{IUniswapV3Pool, RawLog};
use crate::error::FetchError;
use crate::logic::types::{PoolRecord, PoolSample, Query};
use crate::utils::Token;
use crate::utils::token::u256_to_f64;
use alloy_primitives::{I256, U256};
use alloy_sol_types::SolEvent;
use tracing::debug;

/// 2^96, the fixed-point scale of `sqrtPriceX96`.
const Q96: f64 = 79_228_162_514_264_337_593_543_950_336.0;

/// One decoded swap, stamped with the timestamp of its block.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapObservation {
    pub timestamp: u64,
    pub block_number: u64,
    pub log_index: u64,
    pub amount0: I256,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
}

impl SwapObservation {
    pub fn decode(log: &RawLog, timestamp: u64) -> Result<Self, FetchError> {
        let event = IUniswapV3Pool::Swap::decode_raw_log(log.topics.iter().copied(), &log.data)?;
        Ok(Self {
            timestamp,
            block_number: log.block_number,
            log_index: log.log_index,
            amount0: event.amount0,
            sqrt_price_x96: U256::from(event.sqrtPriceX96),
            liquidity: event.liquidity,
        })
    }
}

/// Turns the swaps of one pool into per-interval samples.
///
/// Each interval `[t, t + interval)` takes price and liquidity from its last swap and the sum of
/// `|amount0|` as volume. Intervals without swaps carry the previous price and liquidity with zero
/// volume; intervals before the first swap are left out.
#[derive(Debug, Clone)]
pub struct SwapAggregator {
    token0: Token,
    token1: Token,
}

impl SwapAggregator {
    pub fn new(token0: Token, token1: Token) -> Self {
        Self { token0, token1 }
    }

    /// Decimal-adjusted price of token0 in token1.
    pub fn price(&self, sqrt_price_x96: U256) -> f64 {
        let ratio = u256_to_f64(sqrt_price_x96) / Q96;
        let decimals = self.token0.get_decimals() as i32 - self.token1.get_decimals() as i32;
        ratio * ratio * 10f64.powi(decimals)
    }

    pub fn aggregate(&self, query: &Query, swaps: &[SwapObservation]) -> PoolRecord {
        let mut swaps: Vec<&SwapObservation> = swaps
            .iter()
            .filter(|s| s.timestamp >= query.start_time && s.timestamp < query.end_time)
            .collect();
        swaps.sort_by_key(|s| (s.block_number, s.log_index));

        let interval = query.interval_secs.max(1);
        let mut samples = Vec::new();
        let mut carried: Option<(f64, f64)> = None;
        let mut cursor = swaps.iter().peekable();
        let mut slot_start = query.start_time;

        while slot_start < query.end_time {
            let slot_end = slot_start.saturating_add(interval);
            let mut volume = 0.0;
            let mut traded = false;

            while let Some(swap) = cursor.next_if(|s| s.timestamp < slot_end) {
                volume += self.token0.to_float_sign(swap.amount0).abs();
                carried = Some((self.price(swap.sqrt_price_x96), swap.liquidity as f64));
                traded = true;
            }

            if let Some((price, liquidity)) = carried {
                samples.push(PoolSample::new(slot_start, price, liquidity, if traded { volume } else { 0.0 }));
            }
            slot_start = slot_end;
        }

        debug!(
            "Query {}: aggregated {} swaps into {} samples",
            query.query_id,
            swaps.len(),
            samples.len()
        );
        PoolRecord::new(samples)
    }
}
