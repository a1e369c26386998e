//! Operation pipeline: prepare -> complete -> simulate & limit -> send ->
//! observe receipt, plus the read-only helpers (query invoke, balance, next
//! nonce, block info) that share the same RPC façade and cache.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::{BlockCache, TxCache};
use crate::constants::DEFAULT_REVEAL_LIMITS;
use crate::errors::{map_error, ConnectorError, ErrorReason, RpcMethodCategory};
use crate::retrier::{self, RetryPolicy};
use crate::rpc::types::{
    BlockInfo, BlockSelector, ContentItem, ContentSimulationResult, ExtraInfo, Limits, Operation,
    OperationHash, TransactionReceipt,
};
use crate::rpc::{SignerClient, TezosRpc};

#[derive(Debug, Clone, Serialize)]
pub struct PrepareResult {
    pub gas: i64,
    pub transaction_data: String,
}

pub struct OperationPipeline<R: TezosRpc, S: SignerClient> {
    rpc: Arc<R>,
    signer: Arc<S>,
    cache: Arc<BlockCache>,
    tx_cache: Arc<TxCache>,
    retry_policy: RetryPolicy,
    network: String,
    gas_estimation_factor: f64,
    max_fee: i64,
}

/// Scales simulated gas/storage by `factor` into limits, then derives a fee
/// bound from those limits. The fee formula itself (`100 + gas_limit*0.1 +
/// storage_limit`) has no upstream reference to check against - it is an
/// explicitly invented placeholder standing in for a real mutez-per-gas-unit
/// / mutez-per-byte cost model, not a transcription of an existing formula.
/// Recorded as such in the grounding ledger rather than left to look like an
/// overlooked value.
fn assign_limits(sim: &ContentSimulationResult, factor: f64) -> Limits {
    let gas_limit = ((sim.consumed_gas as f64) * factor).ceil() as i64;
    let storage_limit = ((sim.paid_storage_size_diff.max(0) as f64) * factor).ceil() as i64;
    let fee = 100 + (gas_limit as f64 * 0.1).ceil() as i64 + storage_limit;
    Limits { fee, gas_limit, storage_limit }
}

impl<R: TezosRpc + 'static, S: SignerClient + 'static> OperationPipeline<R, S> {
    pub fn new(
        rpc: Arc<R>,
        signer: Arc<S>,
        cache: Arc<BlockCache>,
        tx_cache: Arc<TxCache>,
        retry_policy: RetryPolicy,
        network: String,
        gas_estimation_factor: f64,
        max_fee: i64,
    ) -> Self {
        Self { rpc, signer, cache, tx_cache, retry_policy, network, gas_estimation_factor, max_fee }
    }

    fn map_block_error(&self, error: anyhow::Error) -> ConnectorError {
        match map_error(RpcMethodCategory::Block, &error.to_string()) {
            ErrorReason::NotFound => ConnectorError::NotFound(error.to_string()),
            _ => ConnectorError::Other(error),
        }
    }

    fn map_send_error(&self, error: anyhow::Error) -> ConnectorError {
        match map_error(RpcMethodCategory::Send, &error.to_string()) {
            ErrorReason::NonceTooLow => ConnectorError::NonceTooLow(error.to_string()),
            _ => ConnectorError::Other(error),
        }
    }

    /// Attaches branch, network, source, optional reveal, and counters. Called
    /// both from `prepare` (fresh operation) and `send` (re-run against a
    /// possibly-stale pre-signed payload).
    pub async fn complete(&self, op: &mut Operation, nonce_hint: Option<i64>) -> Result<(), ConnectorError> {
        let head = self.rpc.get_head_block().await.map_err(ConnectorError::Other)?;
        op.branch = head.hash;
        op.network = self.network.clone();

        let state = self.rpc.get_contract_state(&op.source).await.map_err(ConnectorError::Other)?;

        let needs_reveal =
            !state.revealed && !matches!(op.contents.first(), Some(ContentItem::Reveal { .. }));
        if needs_reveal {
            let public_key = self.signer.fetch_public_key(&op.source).await.map_err(ConnectorError::Other)?;
            op.contents.insert(
                0,
                ContentItem::Reveal {
                    source: op.source.clone(),
                    counter: 0,
                    public_key,
                    limits: DEFAULT_REVEAL_LIMITS,
                },
            );
        }

        let starting_counter = std::cmp::max(nonce_hint.unwrap_or(0), state.counter + 1);
        for (i, item) in op.contents.iter_mut().enumerate() {
            item.set_counter(starting_counter + i as i64);
        }
        Ok(())
    }

    pub async fn simulate_and_assign_limits(
        &self,
        op: &mut Operation,
        ignore_limits: bool,
    ) -> Result<(), ConnectorError> {
        let simulation = self.rpc.simulate(op).await.map_err(ConnectorError::Other)?;
        if !simulation.success {
            return Err(ConnectorError::TransactionReverted(
                simulation.error.unwrap_or_else(|| "simulation failed".to_string()),
            ));
        }

        if ignore_limits {
            return Ok(());
        }

        let mut total_fee = 0i64;
        for (item, result) in op.contents.iter_mut().zip(simulation.content_results.iter()) {
            let limits = assign_limits(result, self.gas_estimation_factor);
            total_fee += limits.fee;
            item.set_limits(limits);
        }
        if total_fee > self.max_fee {
            return Err(ConnectorError::Other(anyhow::anyhow!(
                "simulated fee {total_fee} exceeds configured maximum {}",
                self.max_fee
            )));
        }
        Ok(())
    }

    pub async fn prepare(
        &self,
        from: &str,
        to: &str,
        nonce_hint: Option<i64>,
        params: &Value,
        gas: i64,
        ignore_limits: bool,
    ) -> Result<PrepareResult, ConnectorError> {
        let mut op = Operation {
            source: from.to_string(),
            branch: String::new(),
            network: String::new(),
            contents: vec![ContentItem::Transaction {
                source: from.to_string(),
                destination: to.to_string(),
                counter: 0,
                amount: "0".to_string(),
                parameters: Some(params.clone()),
                limits: Limits::default(),
            }],
            signature: None,
        };

        self.complete(&mut op, nonce_hint).await?;
        self.simulate_and_assign_limits(&mut op, ignore_limits).await?;

        Ok(PrepareResult { gas, transaction_data: hex::encode(op.watermarked_bytes()) })
    }

    /// Same prepare shape as [`Self::prepare`], for `contract_deploy_prepare` -
    /// the content item is an origination rather than a transaction.
    pub async fn prepare_origination(
        &self,
        from: &str,
        script: &Value,
        nonce_hint: Option<i64>,
    ) -> Result<PrepareResult, ConnectorError> {
        let mut op = Operation {
            source: from.to_string(),
            branch: String::new(),
            network: String::new(),
            contents: vec![ContentItem::Origination {
                source: from.to_string(),
                counter: 0,
                script: script.clone(),
                balance: "0".to_string(),
                limits: Limits::default(),
            }],
            signature: None,
        };

        self.complete(&mut op, nonce_hint).await?;
        self.simulate_and_assign_limits(&mut op, false).await?;

        Ok(PrepareResult { gas: 0, transaction_data: hex::encode(op.watermarked_bytes()) })
    }

    pub async fn send(
        &self,
        transaction_data_hex: &str,
        nonce_hint: Option<i64>,
    ) -> Result<OperationHash, ConnectorError> {
        let bytes = hex::decode(transaction_data_hex)
            .map_err(|e| ConnectorError::InvalidInputs(format!("invalid transaction_data hex: {e}")))?;
        if bytes.is_empty() {
            return Err(ConnectorError::InvalidInputs("empty transaction_data".to_string()));
        }
        let mut op: Operation = serde_json::from_slice(&bytes[1..])
            .map_err(|e| ConnectorError::InvalidInputs(format!("invalid transaction_data payload: {e}")))?;

        self.complete(&mut op, nonce_hint).await?;

        let watermarked = op.watermarked_bytes();
        let signature =
            self.signer.sign(&op.source, &watermarked).await.map_err(ConnectorError::Other)?;
        op.signature = Some(signature);

        self.rpc.broadcast(&op).await.map_err(|e| self.map_send_error(e))
    }

    pub async fn observe_receipt(
        &self,
        transaction_hash: &str,
        cancellation: &CancellationToken,
    ) -> Result<TransactionReceipt, ConnectorError> {
        if let Some(cached) = self.tx_cache.get(transaction_hash) {
            return Ok((*cached).clone());
        }

        let head = self.rpc.get_head_block().await.map_err(ConnectorError::Other)?;
        let block_hash = head.hash;
        let raw = retrier::retry(&self.retry_policy, cancellation, "observe_receipt", |_attempt| {
            let rpc = self.rpc.clone();
            let block_hash = block_hash.clone();
            let transaction_hash = transaction_hash.to_string();
            async move { rpc.get_operation_receipt(&block_hash, &transaction_hash).await }
        })
        .await
        .map_err(ConnectorError::Other)?;

        let mut extra_info = Vec::new();
        let mut contract_location = None;

        for item in &raw.content_results {
            match item.kind.as_str() {
                "transaction" => {
                    if let Some(destination) = &item.destination {
                        if destination.starts_with("KT1") {
                            contract_location = Some(crate::rpc::types::ContractLocation {
                                address: destination.clone(),
                            });
                            if let Err(e) = self.rpc.get_contract_script(destination).await {
                                tracing::debug!("best-effort script fetch for {destination} failed: {e}");
                            }
                        }
                    }
                    extra_info.push(ExtraInfo::Transaction {
                        consumed_gas: item.consumed_milligas / 1000,
                        gas_limit: item.gas_limit,
                        storage_size: item.storage_size,
                        paid_storage_size_diff: item.paid_storage_size_diff,
                        storage_limit: item.storage_limit,
                        source: item.source.clone(),
                        destination: item.destination.clone().unwrap_or_default(),
                        counter: item.counter,
                        fee: item.fee,
                        status: item.status.clone(),
                        error_message: item.error_message.clone(),
                        storage: item.storage.clone(),
                    });
                },
                "origination" => {
                    extra_info.push(ExtraInfo::Origination {
                        source: item.source.clone(),
                        counter: item.counter,
                        originated_contract: item.originated_contract.clone(),
                        storage: item.storage.clone(),
                    });
                },
                _ => {},
            }
        }

        let receipt = TransactionReceipt {
            block_number: raw.block_number,
            block_hash: raw.block_hash,
            tx_index: raw.tx_index,
            success: raw.success,
            protocol_id: raw.protocol_id,
            contract_location,
            extra_info,
        };
        self.tx_cache.insert(transaction_hash.to_string(), Arc::new(receipt.clone()));
        Ok(receipt)
    }

    pub async fn query_invoke(
        &self,
        contract: &str,
        entrypoint: &str,
        params: &Value,
        source: &str,
    ) -> Result<Value, ConnectorError> {
        let datum =
            self.rpc.run_view(contract, entrypoint, params, source).await.map_err(ConnectorError::Other)?;
        Ok(michelson_datum_to_json(&datum))
    }

    pub async fn balance(&self, address: &str) -> Result<String, ConnectorError> {
        if !is_plausible_address(address) {
            return Err(ConnectorError::InvalidInputs(format!("invalid address: {address}")));
        }
        let head = self.rpc.get_head_block().await.map_err(ConnectorError::Other)?;
        self.rpc.get_contract_balance(address, &head.hash).await.map_err(ConnectorError::Other)
    }

    pub async fn next_nonce(&self, address: &str) -> Result<i64, ConnectorError> {
        let state = self.rpc.get_contract_state(address).await.map_err(ConnectorError::Other)?;
        Ok(state.counter + 1)
    }

    pub async fn block_info_by_number(
        &self,
        number: i64,
        expected_parent_hash: Option<&str>,
    ) -> Result<BlockInfo, ConnectorError> {
        if let Some(cached) = self.cache.get_by_height(number, expected_parent_hash) {
            return Ok((*cached).clone());
        }
        let block = self
            .rpc
            .get_block(BlockSelector::Height(number))
            .await
            .map_err(|e| self.map_block_error(e))?;
        self.cache.insert(Arc::new(block.clone()));
        Ok(block)
    }

    pub async fn block_info_by_hash(&self, hash: &str) -> Result<BlockInfo, ConnectorError> {
        if let Some(cached) = self.cache.get_by_hash(hash) {
            return Ok((*cached).clone());
        }
        let block = self
            .rpc
            .get_block(BlockSelector::Hash(hash.to_string()))
            .await
            .map_err(|e| self.map_block_error(e))?;
        self.cache.insert(Arc::new(block.clone()));
        Ok(block)
    }
}

fn is_plausible_address(address: &str) -> bool {
    let prefixes = ["tz1", "tz2", "tz3", "KT1"];
    prefixes.iter().any(|p| address.starts_with(p)) && address.len() >= 36
}

/// Converts a Michelson datum returned by `run_view` into the JSON shape the
/// framework expects: `Elt(key, value)` sequences become `{key, value}`
/// arrays; a comma-joined string becomes a string array; everything else
/// passes through as its own JSON representation.
fn michelson_datum_to_json(datum: &Value) -> Value {
    if let Some(array) = datum.as_array() {
        if !array.is_empty()
            && array.iter().all(|e| e.get("prim").and_then(Value::as_str) == Some("Elt"))
        {
            let entries: Vec<Value> = array
                .iter()
                .filter_map(|e| {
                    let args = e.get("args")?.as_array()?;
                    Some(serde_json::json!({ "key": args.first()?, "value": args.get(1)? }))
                })
                .collect();
            return Value::Array(entries);
        }
    }
    if let Some(s) = datum.as_str() {
        if s.contains(',') {
            return Value::Array(s.split(',').map(|p| Value::String(p.trim().to_string())).collect());
        }
    }
    datum.clone()
}
