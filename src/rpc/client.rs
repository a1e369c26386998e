//! HTTP façade over the Tezos node's JSON/RPC surface.
//!
//! Each method performs exactly one request - retrying belongs to
//! [`crate::retrier`], composed by callers (the tracker, the pipeline), not
//! duplicated here. Response bodies are deserialized directly into this
//! crate's own receipt/simulation/block types rather than the node's full
//! `operations`/`metadata` tree; callers only ever see the already-reduced
//! shape they need.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use super::types::{
    AccountState, BlockInfo, BlockSelector, HeaderNotification, Operation, OperationHash,
    OperationReceipt, SimulationResult,
};

#[async_trait]
pub trait TezosRpc: Send + Sync {
    async fn get_head_block(&self) -> anyhow::Result<BlockInfo>;
    async fn get_block(&self, selector: BlockSelector) -> anyhow::Result<BlockInfo>;
    async fn get_contract_state(&self, address: &str) -> anyhow::Result<AccountState>;
    async fn get_contract_balance(&self, address: &str, at_block_hash: &str) -> anyhow::Result<String>;
    async fn get_contract_script(&self, address: &str) -> anyhow::Result<Value>;
    async fn simulate(&self, op: &Operation) -> anyhow::Result<SimulationResult>;
    async fn broadcast(&self, op: &Operation) -> anyhow::Result<OperationHash>;
    async fn run_view(
        &self,
        contract: &str,
        entrypoint: &str,
        input: &Value,
        source: &str,
    ) -> anyhow::Result<Value>;
    async fn monitor_block_header(
        &self,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<HeaderNotification>>>;
    async fn get_operation_receipt(
        &self,
        block_hash: &str,
        operation_hash: &str,
    ) -> anyhow::Result<OperationReceipt>;
}

pub struct HttpTezosRpc {
    client: Client,
    base_url: Url,
}

impl HttpTezosRpc {
    pub fn new(base_url: Url) -> Self {
        Self { client: Client::new(), base_url }
    }

    fn path(&self, segment: &str) -> anyhow::Result<Url> {
        Ok(self.base_url.join(segment)?)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, segment: &str) -> anyhow::Result<T> {
        let url = self.path(segment)?;
        let response = self.client.get(url).send().await?;
        Self::json_or_error(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        segment: &str,
        body: &Value,
    ) -> anyhow::Result<T> {
        let url = self.path(segment)?;
        let response = self.client.post(url).json(body).send().await?;
        Self::json_or_error(response).await
    }

    async fn json_or_error<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> anyhow::Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("rpc error: status {} {}", status.as_u16(), body);
        }
        Ok(response.json::<T>().await?)
    }

    fn block_segment(selector: &BlockSelector) -> String {
        match selector {
            BlockSelector::Head => "head".to_string(),
            BlockSelector::Height(h) => h.to_string(),
            BlockSelector::Hash(h) => h.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBlockHeader {
    level: i64,
    hash: String,
    predecessor: String,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOperationEntry {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    header: RawBlockHeader,
    operations: Vec<Vec<RawOperationEntry>>,
}

impl From<RawBlock> for BlockInfo {
    fn from(raw: RawBlock) -> Self {
        let transaction_hashes = raw
            .operations
            .get(crate::constants::MANAGER_OPERATION_BATCH_INDEX)
            .map(|batch| batch.iter().map(|op| op.hash.clone()).collect())
            .unwrap_or_default();
        BlockInfo {
            height: raw.header.level,
            hash: raw.header.hash,
            parent: raw.header.predecessor,
            timestamp: raw.header.timestamp,
            transaction_hashes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawContractState {
    counter: String,
    revealed: bool,
}

#[async_trait]
impl TezosRpc for HttpTezosRpc {
    async fn get_head_block(&self) -> anyhow::Result<BlockInfo> {
        self.get_block(BlockSelector::Head).await
    }

    async fn get_block(&self, selector: BlockSelector) -> anyhow::Result<BlockInfo> {
        let segment = format!("chains/main/blocks/{}", Self::block_segment(&selector));
        let raw: RawBlock = self.get_json(&segment).await?;
        Ok(raw.into())
    }

    async fn get_contract_state(&self, address: &str) -> anyhow::Result<AccountState> {
        let segment = format!("chains/main/blocks/head/context/contracts/{address}");
        let raw: RawContractState = self.get_json(&segment).await?;
        let counter = raw
            .counter
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!("malformed counter '{}' for {address}", raw.counter))?;
        Ok(AccountState { counter, revealed: raw.revealed })
    }

    async fn get_contract_balance(&self, address: &str, at_block_hash: &str) -> anyhow::Result<String> {
        let segment = format!("chains/main/blocks/{at_block_hash}/context/contracts/{address}/balance");
        self.get_json(&segment).await
    }

    async fn get_contract_script(&self, address: &str) -> anyhow::Result<Value> {
        let segment = format!("chains/main/blocks/head/context/contracts/{address}/script");
        self.get_json(&segment).await
    }

    async fn simulate(&self, op: &Operation) -> anyhow::Result<SimulationResult> {
        let body = serde_json::to_value(op)?;
        self.post_json("chains/main/blocks/head/helpers/scripts/simulate_operation", &body).await
    }

    async fn broadcast(&self, op: &Operation) -> anyhow::Result<OperationHash> {
        let body = serde_json::to_value(op)?;
        self.post_json("injection/operation", &body).await
    }

    async fn run_view(
        &self,
        contract: &str,
        entrypoint: &str,
        input: &Value,
        source: &str,
    ) -> anyhow::Result<Value> {
        let body = serde_json::json!({
            "contract": contract,
            "entrypoint": entrypoint,
            "input": input,
            "source": source,
        });
        self.post_json("chains/main/blocks/head/helpers/scripts/run_view", &body).await
    }

    async fn monitor_block_header(
        &self,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<HeaderNotification>>> {
        let url = self.path("monitor/heads/main")?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            anyhow::bail!("rpc error: status 404 monitor_heads not supported by this node");
        }
        if !response.status().is_success() {
            anyhow::bail!("rpc error: status {} monitor_heads failed", response.status().as_u16());
        }

        let byte_stream = response.bytes_stream();
        let stream = futures::stream::unfold(
            (byte_stream, Vec::<u8>::new()),
            |(mut byte_stream, mut buffer)| async move {
                loop {
                    if let Some(object) = extract_json_object(&mut buffer) {
                        let notification = serde_json::from_slice::<RawBlockHeader>(&object)
                            .map(|h| HeaderNotification {
                                height: h.level,
                                hash: h.hash,
                                parent: h.predecessor,
                            })
                            .map_err(anyhow::Error::from);
                        return Some((notification, (byte_stream, buffer)));
                    }
                    match byte_stream.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(e)) => return Some((Err(anyhow::Error::from(e)), (byte_stream, buffer))),
                        None => return None,
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn get_operation_receipt(
        &self,
        block_hash: &str,
        operation_hash: &str,
    ) -> anyhow::Result<OperationReceipt> {
        let segment = format!(
            "chains/main/blocks/{block_hash}/operations?hash={operation_hash}"
        );
        self.get_json(&segment).await
    }
}

/// Tezos' `monitor_heads` stream is a sequence of concatenated JSON objects
/// with no length framing. Scans `buffer` for one complete top-level object,
/// draining it (and anything before it) out of `buffer` on success.
fn extract_json_object(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = None;

    for (i, &byte) in buffer.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            },
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        let object = buffer[s..=i].to_vec();
                        buffer.drain(0..=i);
                        return Some(object);
                    }
                }
            },
            _ => {},
        }
    }
    None
}
