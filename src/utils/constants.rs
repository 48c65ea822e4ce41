use alloy_primitives::{Address, address};

/// Uniswap V3 mainnet launch (2021-05-04 UTC). No pool history exists before it.
pub const HISTORY_START_TIMESTAMP: u64 = 1_620_086_400;

pub const DAY_SECONDS: u64 = 86_400;

/// Default sampling interval of a pool record: five minutes.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Values above this are treated as garbage rather than pool metrics.
pub const MAX_SANE_VALUE: f64 = 1e60;

/// Relative-error floor used when the reference value is zero.
pub const EPS: f64 = 1e-10;

/// Largest miner response body accepted by default: 16 MiB.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Scale used when exporting weights to the incentive runtime.
pub const CHAIN_WEIGHT_SCALE: f64 = 1000.0;

pub const WETH: Address = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
pub const USDT: Address = address!("0xdAC17F958D2ee523a2206206994597C13D831ec7");

#[non_exhaustive]
pub struct EthereumFactoryAddress;

impl EthereumFactoryAddress {
    pub const UNISWAP_V3: Address = address!("0x1F98431c8aD98523631AE4a59f267346ea31F984");
}
