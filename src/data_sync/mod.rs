/// Data Synchronization Layer
///
/// This layer implements the miner-side fetch client. It provides:
///
/// - JSON-RPC access to the execution client (blocks, eth_call, eth_getLogs)
/// - Pool resolution through the Uniswap V3 factory
/// - Block-range search and paged Swap log retrieval
/// - Aggregation of swaps into per-interval pool records
///
/// The validator uses the same client for direct reference resolution.

pub mod aggregator;
pub mod config;
pub mod fetcher;
pub mod rpc;


// Re-export main components for easy usage
pub use aggregator::{SwapAggregator, SwapObservation};
pub use config::FetchConfig;
pub use fetcher::PoolFetcher;
pub use rpc::{BlockInfo, ChainRpc, JsonRpcClient, RawLog};
