use crate::data_sync::aggregator::{SwapAggregator, SwapObservation};
use crate::data_sync::config::FetchConfig;
use crate::data_sync::rpc::{ChainRpc, IERC20Metadata, IUniswapV3Factory, IUniswapV3Pool, JsonRpcClient, RawLog};
use crate::error::FetchError;
use crate::logic::types::{PoolRecord, Query};
use crate::utils::Token;
use alloy_primitives::{Address, aliases::U24};
use alloy_sol_types::{SolCall, SolEvent};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Miner-side fetch client: resolves a query into a normalized [`PoolRecord`] from the execution
/// client's RPC.
pub struct PoolFetcher<R: ChainRpc> {
    rpc: Arc<R>,
    factory: Address,
    max_block_range: u64,
    // block number -> timestamp
    block_times: DashMap<u64, u64>,
    decimals: DashMap<Address, u8>,
}

impl PoolFetcher<JsonRpcClient> {
    pub fn from_config(config: &FetchConfig) -> eyre::Result<Self> {
        config.validate()?;
        let rpc = JsonRpcClient::new(config.rpc_http_url.clone(), config.http_timeout())
            .map_err(|e| eyre::eyre!("Failed to create RPC client: {}", e))?;
        Ok(Self::new(Arc::new(rpc), config.factory()?, config.max_block_range))
    }
}

impl<R: ChainRpc> PoolFetcher<R> {
    pub fn new(rpc: Arc<R>, factory: Address, max_block_range: u64) -> Self {
        Self { rpc, factory, max_block_range: max_block_range.max(1), block_times: DashMap::new(), decimals: DashMap::new() }
    }

    pub async fn fetch(&self, query: &Query) -> Result<PoolRecord, FetchError> {
        if query.end_time <= query.start_time || query.interval_secs == 0 {
            return Err(FetchError::InvalidRange { start: query.start_time, end: query.end_time });
        }
        let start = Instant::now();

        let pool = self.pool_address(query).await?;
        let latest = self.rpc.block_number().await?;
        let from_block = self.first_block_at_or_after(query.start_time, latest).await?;
        let end_block = self.first_block_at_or_after(query.end_time, latest).await?;

        let logs = if from_block < end_block { self.swap_logs(pool, from_block, end_block - 1).await? } else { Vec::new() };

        let mut swaps = Vec::with_capacity(logs.len());
        for log in &logs {
            let timestamp = self.block_timestamp(log.block_number).await?;
            match SwapObservation::decode(log, timestamp) {
                Ok(swap) => swaps.push(swap),
                Err(e) => warn!("Pool {}: skipping undecodable log in block {}: {}", pool, log.block_number, e),
            }
        }

        let token0 = self.token(query.token0).await?;
        let token1 = self.token(query.token1).await?;
        let record = SwapAggregator::new(token0, token1).aggregate(query, &swaps);

        info!(
            "Query {}: fetched {} swaps from blocks {}..{} of pool {} in {:?}",
            query.query_id,
            swaps.len(),
            from_block,
            end_block,
            pool,
            start.elapsed()
        );
        Ok(record)
    }

    /// Timestamp of the chain head: the end of the history this client can serve.
    pub async fn completed_until(&self) -> Result<u64, FetchError> {
        let latest = self.rpc.block_number().await?;
        self.block_timestamp(latest).await
    }

    pub async fn pool_address(&self, query: &Query) -> Result<Address, FetchError> {
        let call = IUniswapV3Factory::getPoolCall {
            tokenA: query.token0,
            tokenB: query.token1,
            fee: U24::from(query.fee_tier.as_u32()),
        };
        let response = self.rpc.call(self.factory, call.abi_encode().into(), None).await?;
        let pool = IUniswapV3Factory::getPoolCall::abi_decode_returns(&response)?;

        if pool == Address::ZERO {
            return Err(FetchError::PoolNotFound(format!("{}/{} fee={}", query.token0, query.token1, query.fee_tier)));
        }
        Ok(pool)
    }

    async fn token(&self, address: Address) -> Result<Token, FetchError> {
        if let Some(decimals) = self.decimals.get(&address) {
            return Ok(Token::new_with_data(address, None, Some(*decimals)));
        }

        let response = self.rpc.call(address, IERC20Metadata::decimalsCall {}.abi_encode().into(), None).await?;
        let decimals = IERC20Metadata::decimalsCall::abi_decode_returns(&response)?;
        self.decimals.insert(address, decimals);
        Ok(Token::new_with_data(address, None, Some(decimals)))
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, FetchError> {
        if let Some(timestamp) = self.block_times.get(&number) {
            return Ok(*timestamp);
        }
        let block = self.rpc.block(number).await?;
        self.block_times.insert(number, block.timestamp);
        Ok(block.timestamp)
    }

    /// Lowest block number whose timestamp is `>= timestamp`, or `latest + 1` when every block is
    /// older. Block timestamps are monotonic, so this is a binary search.
    pub async fn first_block_at_or_after(&self, timestamp: u64, latest: u64) -> Result<u64, FetchError> {
        let (mut lo, mut hi) = (0u64, latest + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.block_timestamp(mid).await? < timestamp {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    async fn swap_logs(&self, pool: Address, from_block: u64, to_block: u64) -> Result<Vec<RawLog>, FetchError> {
        let mut logs = Vec::new();
        let mut page_start = from_block;
        let mut pages = 0;

        while page_start <= to_block {
            let page_end = page_start.saturating_add(self.max_block_range - 1).min(to_block);
            let page = self.rpc.logs(pool, IUniswapV3Pool::Swap::SIGNATURE_HASH, page_start, page_end).await?;
            debug!("Pool {}: blocks {}..={} returned {} swap logs", pool, page_start, page_end, page.len());
            logs.extend(page);
            pages += 1;
            page_start = page_end + 1;
        }

        // overlapping pages from a lenient node must not double count
        let mut seen = BTreeSet::new();
        logs.retain(|log| seen.insert((log.block_number, log.log_index)));
        debug!("Pool {}: {} swap logs over {} pages", pool, logs.len(), pages);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::tests::MockChain;
    use crate::logic::types::FeeTier;

    #[tokio::test]
    async fn test_block_search() {
        let chain = Arc::new(MockChain::new(1_000, 12, 100));
        let fetcher = PoolFetcher::new(chain, Address::repeat_byte(0xfa), 10);

        // block n has timestamp 1_000 + 12n
        assert_eq!(fetcher.first_block_at_or_after(0, 100).await.unwrap(), 0);
        assert_eq!(fetcher.first_block_at_or_after(1_000, 100).await.unwrap(), 0);
        assert_eq!(fetcher.first_block_at_or_after(1_001, 100).await.unwrap(), 1);
        assert_eq!(fetcher.first_block_at_or_after(1_120, 100).await.unwrap(), 10);
        assert_eq!(fetcher.first_block_at_or_after(9_999, 100).await.unwrap(), 101);
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let chain = Arc::new(MockChain::new(1_000, 12, 100));
        let fetcher = PoolFetcher::new(chain, Address::repeat_byte(0xfa), 10);
        let query = Query::new(Address::repeat_byte(8), Address::repeat_byte(9), FeeTier::High, 1_000, 1_600, 300, 0);
        assert!(matches!(fetcher.fetch(&query).await, Err(FetchError::PoolNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_range() {
        let chain = Arc::new(MockChain::new(1_000, 12, 100));
        let fetcher = PoolFetcher::new(chain, Address::repeat_byte(0xfa), 10);
        let query = Query::new(Address::repeat_byte(1), Address::repeat_byte(2), FeeTier::Medium, 1_600, 1_600, 300, 0);
        assert!(matches!(fetcher.fetch(&query).await, Err(FetchError::InvalidRange { .. })));
    }
}
