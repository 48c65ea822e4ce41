use crate::utils::constants::EthereumFactoryAddress;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Configuration of the miner-side fetch client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// HTTP RPC URL of the execution client
    pub rpc_http_url: String,
    /// Uniswap V3 factory used to resolve pool addresses
    pub factory_address: String,
    /// Maximum number of blocks covered by a single eth_getLogs request
    pub max_block_range: u64,
    /// Timeout for HTTP requests in seconds
    pub http_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            rpc_http_url: "http://127.0.0.1:8545".to_string(),
            factory_address: EthereumFactoryAddress::UNISWAP_V3.to_string(),
            max_block_range: 2_000,
            http_timeout_secs: 10,
        }
    }
}

impl FetchConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();

        if let Ok(rpc_http_url) = std::env::var("RPC_HTTP_URL") {
            Url::parse(&rpc_http_url).map_err(|e| eyre::eyre!("Invalid RPC_HTTP_URL: {}", e))?;
            config.rpc_http_url = rpc_http_url;
        }

        if let Ok(factory_address) = std::env::var("FACTORY_ADDRESS") {
            config.factory_address = factory_address;
        }

        if let Ok(range_str) = std::env::var("MAX_BLOCK_RANGE") {
            config.max_block_range =
                range_str.parse().map_err(|e| eyre::eyre!("Invalid MAX_BLOCK_RANGE: {}", e))?;
        }

        if let Ok(timeout_str) = std::env::var("HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs =
                timeout_str.parse().map_err(|e| eyre::eyre!("Invalid HTTP_TIMEOUT_SECS: {}", e))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_block_range == 0 {
            return Err(eyre::eyre!("max_block_range must be positive"));
        }
        self.factory()?;
        Ok(())
    }

    pub fn factory(&self) -> eyre::Result<Address> {
        self.factory_address
            .parse::<Address>()
            .map_err(|e| eyre::eyre!("Invalid factory address {}: {}", self.factory_address, e))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
