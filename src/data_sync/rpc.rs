use crate::error::FetchError;
use alloy_primitives::{Address, B256, Bytes};
use alloy_sol_types::sol;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

sol! {
    /// Uniswap V3 factory, only the pool lookup
    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }

    interface IUniswapV3Pool {
        event Swap(
            address indexed sender,
            address indexed recipient,
            int256 amount0,
            int256 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick
        );
    }

    interface IERC20Metadata {
        function decimals() external view returns (uint8);
    }
}

/// Header fields the fetch client needs from a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

/// Log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub block_number: u64,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// The slice of the execution-client RPC surface used by the fetch client.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, FetchError>;

    async fn block(&self, number: u64) -> Result<BlockInfo, FetchError>;

    async fn call(&self, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes, FetchError>;

    async fn logs(&self, address: Address, topic0: B256, from_block: u64, to_block: u64)
    -> Result<Vec<RawLog>, FetchError>;
}

/// JSON-RPC over HTTP
#[derive(Debug)]
pub struct JsonRpcClient {
    http_client: reqwest::Client,
    rpc_url: String,
    request_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client, rpc_url, request_id: AtomicU64::new(1) })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, FetchError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });
        trace!("RPC request {} {}", id, method);

        let response = self
            .http_client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let mut response_json: Value = response.json().await?;

        if let Some(error) = response_json.get("error") {
            return Err(FetchError::Rpc(format!("{method}: {error}")));
        }

        match response_json.get_mut("result").map(Value::take) {
            Some(Value::Null) | None => Err(FetchError::MissingResult),
            Some(result) => Ok(result),
        }
    }
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, FetchError> {
        let result = self.request("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity(&result)
    }

    async fn block(&self, number: u64) -> Result<BlockInfo, FetchError> {
        let result = self
            .request("eth_getBlockByNumber", serde_json::json!([format!("0x{:x}", number), false]))
            .await
            .map_err(|e| match e {
                FetchError::MissingResult => FetchError::BlockNotFound(number.to_string()),
                other => other,
            })?;
        parse_block(&result)
    }

    async fn call(&self, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes, FetchError> {
        let block_param = match block {
            Some(num) => format!("0x{:x}", num),
            None => "latest".to_string(),
        };
        let params = serde_json::json!([
            {
                "to": format!("{:#x}", to),
                "data": format!("{:#x}", data)
            },
            block_param
        ]);

        let result = self.request("eth_call", params).await?;
        let hex_str = result.as_str().ok_or(FetchError::MissingResult)?;
        Ok(hex::decode(hex_str.trim_start_matches("0x"))?.into())
    }

    async fn logs(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, FetchError> {
        let params = serde_json::json!([{
            "address": format!("{:#x}", address),
            "topics": [format!("{:#x}", topic0)],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block)
        }]);

        let result = self.request("eth_getLogs", params).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| FetchError::Rpc("eth_getLogs result is not an array".to_string()))?;
        entries.iter().map(parse_log).collect()
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value, FetchError> {
    value.get(name).ok_or_else(|| FetchError::Rpc(format!("missing field {name}")))
}

pub(crate) fn parse_quantity(value: &Value) -> Result<u64, FetchError> {
    let raw = value
        .as_str()
        .ok_or_else(|| FetchError::Rpc(format!("expected hex quantity, got {value}")))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| FetchError::Rpc(format!("invalid quantity {raw}: {e}")))
}

fn parse_word(value: &Value) -> Result<B256, FetchError> {
    let raw = value
        .as_str()
        .ok_or_else(|| FetchError::Rpc(format!("expected hex word, got {value}")))?;
    let bytes = hex::decode(raw.trim_start_matches("0x"))?;
    if bytes.len() != 32 {
        return Err(FetchError::Rpc(format!("topic {raw} is not 32 bytes")));
    }
    Ok(B256::from_slice(&bytes))
}

pub(crate) fn parse_block(value: &Value) -> Result<BlockInfo, FetchError> {
    Ok(BlockInfo { number: parse_quantity(field(value, "number")?)?, timestamp: parse_quantity(field(value, "timestamp")?)? })
}

pub(crate) fn parse_log(value: &Value) -> Result<RawLog, FetchError> {
    let topics = field(value, "topics")?
        .as_array()
        .ok_or_else(|| FetchError::Rpc("log topics is not an array".to_string()))?
        .iter()
        .map(parse_word)
        .collect::<Result<Vec<_>, _>>()?;

    let data = field(value, "data")?
        .as_str()
        .ok_or_else(|| FetchError::Rpc("log data is not a string".to_string()))?;

    Ok(RawLog {
        block_number: parse_quantity(field(value, "blockNumber")?)?,
        log_index: parse_quantity(field(value, "logIndex")?)?,
        topics,
        data: hex::decode(data.trim_start_matches("0x"))?.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::{SolCall, SolEvent};

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&Value::from("0x1b4")).unwrap(), 436);
        assert_eq!(parse_quantity(&Value::from("0x0")).unwrap(), 0);
        assert!(parse_quantity(&Value::from(12)).is_err());
        assert!(parse_quantity(&Value::from("0xzz")).is_err());
    }

    #[test]
    fn test_parse_block() {
        let block = serde_json::json!({ "number": "0x10", "timestamp": "0x6092c880", "hash": "0xabc" });
        assert_eq!(parse_block(&block).unwrap(), BlockInfo { number: 16, timestamp: 0x6092c880 });
        assert!(parse_block(&serde_json::json!({ "number": "0x10" })).is_err());
    }

    #[test]
    fn test_parse_log() {
        let log = serde_json::json!({
            "address": "0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8",
            "blockNumber": "0x2a",
            "logIndex": "0x3",
            "topics": [format!("{:#x}", IUniswapV3Pool::Swap::SIGNATURE_HASH)],
            "data": "0x0102"
        });
        let parsed = parse_log(&log).unwrap();
        assert_eq!(parsed.block_number, 42);
        assert_eq!(parsed.log_index, 3);
        assert_eq!(parsed.topics, vec![IUniswapV3Pool::Swap::SIGNATURE_HASH]);
        assert_eq!(parsed.data, Bytes::from(vec![1u8, 2]));

        let short_topic = serde_json::json!({
            "blockNumber": "0x2a", "logIndex": "0x0", "topics": ["0x01"], "data": "0x"
        });
        assert!(parse_log(&short_topic).is_err());
    }

    #[test]
    fn test_get_pool_selector() {
        // getPool(address,address,uint24)
        assert_eq!(IUniswapV3Factory::getPoolCall::SELECTOR, [0x16, 0x98, 0xee, 0x82]);
    }

    #[test]
    fn test_client_creation() {
        let client = JsonRpcClient::new("http://127.0.0.1:8545".to_string(), Duration::from_secs(1)).unwrap();
        assert_eq!(client.rpc_url(), "http://127.0.0.1:8545");
    }
}
