//! JSON-RPC client for an Ethereum node, and the execution environment built on it.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::env::{ExecutionEnvironment, Receipt, TransactionRequest};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Error member of a JSON-RPC response.
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// Make a JSON-RPC call against `url` and deserialize the result.
///
/// A `null` result deserializes into `T` as well, so `Option<T>` can be used
/// for methods that return nothing for unknown items.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T> {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response: RpcResponse<Value> = client
        .post(url.clone())
        .json(&body)
        .send()
        .await
        .with_context(|| format!("{method} request to {url} failed"))?
        .json()
        .await
        .with_context(|| format!("Malformed {method} response from {url}"))?;

    if let Some(RpcError { code, message }) = response.error {
        anyhow::bail!("{method} failed with code {code}: {message}");
    }

    serde_json::from_value(response.result.unwrap_or(Value::Null))
        .with_context(|| format!("Unexpected {method} result"))
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", value))
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    /// `0x1` on success, `0x0` on revert. Absent on pre-Byzantium nodes.
    status: Option<String>,
    contract_address: Option<Address>,
    gas_used: String,
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = anyhow::Error;

    fn try_from(receipt: RpcReceipt) -> Result<Self> {
        let success = match receipt.status.as_deref() {
            Some(status) => parse_hex_u64(status)? == 1,
            None => true,
        };

        Ok(Receipt {
            tx_hash: receipt.transaction_hash,
            success,
            contract_address: receipt.contract_address,
            gas_used: parse_hex_u64(&receipt.gas_used)?,
        })
    }
}

/// Execution environment backed by a node's JSON-RPC endpoint.
///
/// Transactions are sent with `eth_sendTransaction`, so the sender must be an
/// account unlocked on the node.
#[derive(Debug, Clone)]
pub struct RpcEnvironment {
    client: reqwest::Client,
    url: Url,
}

impl RpcEnvironment {
    pub fn new(url: Url) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }
}

/// JSON body of an `eth_sendTransaction` request.
fn transaction_params(request: &TransactionRequest) -> Value {
    let mut tx = serde_json::json!({
        "from": request.from,
        "data": request.data,
        "gas": format!("0x{:x}", request.gas),
    });
    if let Some(to) = request.to {
        tx["to"] = serde_json::json!(to);
    }
    tx
}

impl ExecutionEnvironment for RpcEnvironment {
    async fn network_id(&self) -> Result<u64> {
        let version: String = self.call("net_version", vec![]).await?;
        version
            .trim()
            .parse()
            .with_context(|| format!("Invalid net_version: {version}"))
    }

    async fn chain_id(&self) -> Result<u64> {
        let chain_id: String = self.call("eth_chainId", vec![]).await?;
        parse_hex_u64(&chain_id)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        self.call("eth_accounts", vec![]).await
    }

    async fn submit(&self, request: TransactionRequest) -> Result<B256> {
        let tx_hash: B256 = self
            .call("eth_sendTransaction", vec![transaction_params(&request)])
            .await?;

        tracing::debug!(
            %tx_hash,
            from = %request.from,
            to = ?request.to,
            gas = request.gas,
            "Transaction sent"
        );
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await?;

        receipt.map(Receipt::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use alloy_core::primitives::{Bytes, keccak256};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;
    use crate::{
        config::NetworkId,
        confirm::ConfirmationTiming,
        contracts::ArtifactStore,
        error::DeployError,
        orchestrator::{DeploySettings, Orchestrator},
        report::Phase,
    };

    /// A development node on localhost answering with canned JSON-RPC results.
    struct MockNode {
        url: Url,
        sent: Arc<Mutex<Vec<Value>>>,
    }

    impl MockNode {
        async fn start(net_version: &'static str, chain_id: &'static str) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
            let sent = Arc::new(Mutex::new(Vec::new()));

            let node_sent = sent.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let sent = node_sent.clone();
                    tokio::spawn(async move {
                        let _ = serve(stream, net_version, chain_id, sent).await;
                    });
                }
            });

            Self { url, sent }
        }

        fn sent(&self) -> Vec<Value> {
            self.sent.lock().unwrap().clone()
        }
    }

    async fn serve(
        mut stream: TcpStream,
        net_version: &str,
        chain_id: &str,
        sent: Arc<Mutex<Vec<Value>>>,
    ) -> std::io::Result<()> {
        let request = read_request(&mut stream).await?;
        let params = &request["params"];

        let result = match request["method"].as_str().unwrap_or_default() {
            "net_version" => serde_json::json!(net_version),
            "eth_chainId" => serde_json::json!(chain_id),
            "eth_accounts" => serde_json::json!([Address::repeat_byte(0x11)]),
            "eth_sendTransaction" => {
                let mut sent = sent.lock().unwrap();
                sent.push(params[0].clone());
                serde_json::json!(keccak256((sent.len() as u64).to_be_bytes()))
            }
            "eth_getTransactionReceipt" => {
                let tx_hash: B256 = serde_json::from_value(params[0].clone())?;
                serde_json::json!({
                    "transactionHash": tx_hash,
                    "status": "0x1",
                    "contractAddress": Address::from_slice(&tx_hash[12..]),
                    "gasUsed": "0x5208",
                })
            }
            _ => Value::Null,
        };

        let body = serde_json::to_vec(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": result,
        }))?;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&body).await?;
        stream.shutdown().await
    }

    async fn read_request(stream: &mut TcpStream) -> std::io::Result<Value> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let body = end + 4;
                if buf.len() >= body + length {
                    return Ok(serde_json::from_slice(&buf[body..body + length])?);
                }
            }

            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn settings(network_id: u64) -> DeploySettings {
        DeploySettings {
            network_id: NetworkId::Id(network_id),
            gas: 4_600_000,
            from: None,
            gas_price_gwei: None,
            timing: ConfirmationTiming {
                timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    async fn test_rpc_environment_over_http() {
        let node = MockNode::start("2018", "0x539").await;
        let env = RpcEnvironment::new(node.url.clone()).unwrap();

        assert_eq!(env.network_id().await.unwrap(), 2018);
        assert_eq!(env.chain_id().await.unwrap(), 1337);
        assert_eq!(env.accounts().await.unwrap(), vec![Address::repeat_byte(0x11)]);

        let request = TransactionRequest::deployment(
            Address::repeat_byte(0x11),
            Bytes::from_static(&[0x60, 0x80]),
            4_600_000,
        );
        let tx_hash = env.submit(request).await.unwrap();
        let receipt = env.receipt(tx_hash).await.unwrap().unwrap();
        assert_eq!(receipt.tx_hash, tx_hash);
        assert!(receipt.success);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.contract_address, Some(Address::from_slice(&tx_hash[12..])));

        let sent = node.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["gas"], "0x4630c0");
        assert!(sent[0].get("to").is_none());
    }

    #[tokio::test]
    async fn test_deploy_checks_net_version_not_chain_id() {
        // Ganache started with `--networkId 2018` keeps chain id 1337.
        let node = MockNode::start("2018", "0x539").await;
        let env = RpcEnvironment::new(node.url.clone()).unwrap();
        let orchestrator = Orchestrator::new(env, ArtifactStore::placeholder(), settings(2018));

        let deployment = orchestrator.deploy_all().await.unwrap();
        assert_eq!(deployment.chain_id, 1337);
        assert_eq!(deployment.gas.gas_used, 15 * 21_000);

        let sent = node.sent();
        assert_eq!(sent.len(), 15);
        let transfer = &sent[14];
        let to: Address = serde_json::from_value(transfer["to"].clone()).unwrap();
        assert_eq!(to, deployment.addresses.index);
        assert!(transfer["data"].as_str().unwrap().starts_with("0xf2fde38b"));
    }

    #[tokio::test]
    async fn test_deploy_rejects_other_net_version() {
        // Chain id matches the configured id, the network id does not.
        let node = MockNode::start("5777", "0x7e2").await;
        let env = RpcEnvironment::new(node.url.clone()).unwrap();
        let orchestrator = Orchestrator::new(env, ArtifactStore::placeholder(), settings(2018));

        let failure = orchestrator.deploy_all().await.unwrap_err();
        assert_eq!(failure.failed_phase, Phase::Preflight);
        assert!(matches!(
            failure.error,
            DeployError::NetworkMismatch { actual: 5777, .. }
        ));
        assert!(node.sent().is_empty());
    }

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x7e2").unwrap(), 2018);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_response_envelope() {
        let failed: RpcResponse<Value> = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "sender account not recognized"},
        }))
        .unwrap();
        let error = failed.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "sender account not recognized");

        let pending: RpcResponse<Value> =
            serde_json::from_value(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": null}))
                .unwrap();
        assert!(pending.error.is_none());
        let receipt: Option<RpcReceipt> =
            serde_json::from_value(pending.result.unwrap_or(Value::Null)).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn test_transaction_params_deployment_has_no_recipient() {
        let request = TransactionRequest::deployment(
            Address::repeat_byte(0x01),
            Bytes::from_static(&[0x60, 0x80]),
            4_600_000,
        );

        let params = transaction_params(&request);
        assert_eq!(params["gas"], "0x4630c0");
        assert_eq!(params["data"], "0x6080");
        assert!(params.get("to").is_none());
    }

    #[test]
    fn test_transaction_params_call() {
        let to = Address::repeat_byte(0x02);
        let request =
            TransactionRequest::call(Address::repeat_byte(0x01), to, Bytes::new(), 21_000);

        let params = transaction_params(&request);
        assert_eq!(params["to"], serde_json::json!(to));
    }

    #[test]
    fn test_receipt_status() {
        let raw = serde_json::json!({
            "transactionHash": B256::repeat_byte(0xab),
            "status": "0x0",
            "contractAddress": null,
            "gasUsed": "0x7a120",
        });
        let receipt: RpcReceipt = serde_json::from_value(raw).unwrap();
        let receipt = Receipt::try_from(receipt).unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.contract_address, None);
        assert_eq!(receipt.gas_used, 500_000);

        let raw = serde_json::json!({
            "transactionHash": B256::repeat_byte(0xab),
            "status": "0x1",
            "contractAddress": Address::repeat_byte(0x33),
            "gasUsed": "0x5208",
        });
        let receipt: RpcReceipt = serde_json::from_value(raw).unwrap();
        let receipt = Receipt::try_from(receipt).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.contract_address, Some(Address::repeat_byte(0x33)));
        assert_eq!(receipt.gas_used, 21_000);
    }
}
