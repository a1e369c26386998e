//! End-to-end coverage of the connector surface: prepare -> send -> observe
//! receipt, and block listener registration through to a ready tracker,
//! driven against hand-rolled fake RPC/signer clients (the library's
//! `mockall`-generated mocks are `#[cfg(test)]`-only and not visible from an
//! external integration test binary).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use tezosconnect::connector::ConnectorSurface;
use tezosconnect::rpc::types::{
    AccountState, BlockInfo, BlockSelector, ContentSimulationResult, HeaderNotification,
    Operation, OperationHash, OperationReceipt, ReceiptContentResult, SimulationResult,
};
use tezosconnect::rpc::{SignerClient, TezosRpc};
use tezosconnect::settings::{DataFormat, EventsSettings, RetrySettings, ValidatedSettings};

struct FakeRpc {
    head: BlockInfo,
    state: AccountState,
    simulation: SimulationResult,
    broadcast_hash: String,
    receipt: OperationReceipt,
    get_block_calls: AtomicUsize,
}

impl Default for FakeRpc {
    fn default() -> Self {
        Self {
            head: BlockInfo {
                height: 500,
                hash: "BLhead".to_string(),
                parent: "BLparent".to_string(),
                timestamp: None,
                transaction_hashes: vec![],
            },
            state: AccountState { counter: 5, revealed: true },
            simulation: SimulationResult {
                success: true,
                error: None,
                content_results: vec![ContentSimulationResult {
                    consumed_gas: 800,
                    storage_size: 0,
                    paid_storage_size_diff: 0,
                    error: None,
                }],
            },
            broadcast_hash: "onTxHash111111111111111111111111111111".to_string(),
            receipt: OperationReceipt {
                block_hash: "BLhead".to_string(),
                block_number: 500,
                tx_index: 0,
                protocol_id: "PtParisB".to_string(),
                success: true,
                content_results: vec![ReceiptContentResult {
                    kind: "transaction".to_string(),
                    source: "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN".to_string(),
                    destination: Some("KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s".to_string()),
                    counter: 6,
                    fee: 200,
                    status: "applied".to_string(),
                    consumed_milligas: 800_000,
                    storage_size: 0,
                    paid_storage_size_diff: 0,
                    storage_limit: 0,
                    gas_limit: 1200,
                    error_message: None,
                    storage: None,
                    originated_contract: None,
                }],
            },
            get_block_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TezosRpc for FakeRpc {
    async fn get_head_block(&self) -> anyhow::Result<BlockInfo> {
        Ok(self.head.clone())
    }

    async fn get_block(&self, selector: BlockSelector) -> anyhow::Result<BlockInfo> {
        self.get_block_calls.fetch_add(1, Ordering::SeqCst);
        match selector {
            BlockSelector::Height(42) => Ok(BlockInfo {
                height: 42,
                hash: "H42".to_string(),
                parent: "H41".to_string(),
                timestamp: None,
                transaction_hashes: vec![],
            }),
            _ => Ok(self.head.clone()),
        }
    }

    async fn get_contract_state(&self, _address: &str) -> anyhow::Result<AccountState> {
        Ok(self.state)
    }

    async fn get_contract_balance(&self, _address: &str, _at_block_hash: &str) -> anyhow::Result<String> {
        Ok("1000000".to_string())
    }

    async fn get_contract_script(&self, _address: &str) -> anyhow::Result<Value> {
        Ok(serde_json::json!({}))
    }

    async fn simulate(&self, _op: &Operation) -> anyhow::Result<SimulationResult> {
        Ok(self.simulation.clone())
    }

    async fn broadcast(&self, _op: &Operation) -> anyhow::Result<OperationHash> {
        Ok(self.broadcast_hash.clone())
    }

    async fn run_view(
        &self,
        _contract: &str,
        _entrypoint: &str,
        _input: &Value,
        _source: &str,
    ) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    async fn monitor_block_header(
        &self,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<HeaderNotification>>> {
        anyhow::bail!("rpc error: status 404 monitor_heads not supported by this node")
    }

    async fn get_operation_receipt(
        &self,
        _block_hash: &str,
        _operation_hash: &str,
    ) -> anyhow::Result<OperationReceipt> {
        Ok(self.receipt.clone())
    }
}

struct FakeSigner;

#[async_trait]
impl SignerClient for FakeSigner {
    async fn fetch_public_key(&self, _address: &str) -> anyhow::Result<String> {
        Ok("edpkvHVuLHkr5eDiTtQKyUPqgYVAk3Sy4m7qBD8r6abemHkZsMU5Kh".to_string())
    }

    async fn sign(&self, _address: &str, _watermarked_bytes: &[u8]) -> anyhow::Result<String> {
        Ok("sigFakeSignature11111111111111111111111111".to_string())
    }
}

fn settings() -> ValidatedSettings {
    ValidatedSettings {
        rpc_url: "https://node.example/".to_string(),
        network: "mainnet".to_string(),
        signatory_url: Some("https://signer.example/".to_string()),
        block_polling_interval: Duration::from_secs(1),
        block_cache_size: 10,
        tx_cache_size: 10,
        data_format: DataFormat::Map,
        gas_estimation_factor: 1.5,
        max_fee: 1_000_000,
        events: EventsSettings::default(),
        retry: RetrySettings {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        },
    }
}

#[tokio::test]
async fn prepare_send_and_observe_receipt_round_trip() {
    let connector =
        ConnectorSurface::new(Arc::new(FakeRpc::default()), Arc::new(FakeSigner), &settings());

    let params = serde_json::json!({"entrypoint": "default"});
    let prepared = connector
        .transaction_prepare(
            "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN",
            "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s",
            None,
            &params,
            0,
            false,
        )
        .await
        .unwrap();
    assert!(!prepared.transaction_data.is_empty());

    let hash = connector.transaction_send(&prepared.transaction_data, None).await.unwrap();
    assert_eq!(hash, "onTxHash111111111111111111111111111111");

    let receipt = connector.transaction_receipt(&hash).await.unwrap();
    assert!(receipt.success);
    assert_eq!(receipt.block_number, 500);
    assert_eq!(
        receipt.contract_location.unwrap().address,
        "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s"
    );
}

#[tokio::test]
async fn fee_above_cap_is_rejected_before_signing() {
    let mut rpc = FakeRpc::default();
    rpc.simulation.content_results = vec![ContentSimulationResult {
        consumed_gas: 50_000_000,
        storage_size: 0,
        paid_storage_size_diff: 0,
        error: None,
    }];

    let mut capped = settings();
    capped.max_fee = 10;
    let connector = ConnectorSurface::new(Arc::new(rpc), Arc::new(FakeSigner), &capped);

    let params = serde_json::json!({"entrypoint": "default"});
    let result = connector
        .transaction_prepare(
            "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN",
            "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s",
            None,
            &params,
            0,
            false,
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn new_block_listener_starts_tracker_and_reports_ready() {
    let connector = Arc::new(ConnectorSurface::new(
        Arc::new(FakeRpc::default()),
        Arc::new(FakeSigner),
        &settings(),
    ));

    let (tx, _rx) = mpsc::channel(4);
    connector.new_block_listener(Uuid::new_v4(), tx).await;

    assert!(connector.is_ready().await);
    assert!(connector.is_live().await);
}

#[tokio::test]
async fn gas_estimate_is_an_empty_sentinel_not_an_error() {
    let connector =
        ConnectorSurface::new(Arc::new(FakeRpc::default()), Arc::new(FakeSigner), &settings());
    let out = connector.gas_estimate(&serde_json::json!({})).await.unwrap();
    assert!(out.is_object());
}

#[tokio::test]
async fn invalid_address_balance_lookup_is_rejected() {
    let connector =
        ConnectorSurface::new(Arc::new(FakeRpc::default()), Arc::new(FakeSigner), &settings());
    let result = connector.address_balance("not-a-real-address").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn block_cache_avoids_second_rpc_round_trip() {
    let rpc = Arc::new(FakeRpc::default());
    let connector = ConnectorSurface::new(rpc.clone(), Arc::new(FakeSigner), &settings());

    let first = connector.block_info_by_number(42, None).await.unwrap();
    let second = connector.block_info_by_number(42, Some("H41")).await.unwrap();
    assert_eq!(first.hash, second.hash);
    assert_eq!(rpc.get_block_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn observe_receipt_is_cached_after_first_lookup() {
    let rpc = Arc::new(FakeRpc::default());
    let connector = ConnectorSurface::new(rpc, Arc::new(FakeSigner), &settings());

    let first = connector.transaction_receipt("onTxHash111111111111111111111111111111").await.unwrap();
    let second = connector.transaction_receipt("onTxHash111111111111111111111111111111").await.unwrap();
    assert_eq!(first.block_number, second.block_number);
}

#[tokio::test]
async fn get_highest_block_starts_tracker_lazily() {
    let connector = Arc::new(ConnectorSurface::new(
        Arc::new(FakeRpc::default()),
        Arc::new(FakeSigner),
        &settings(),
    ));

    assert!(!connector.is_ready().await);
    let highest = connector.get_highest_block().await;
    assert_eq!(highest, 500);
    assert!(connector.is_ready().await);
}

#[tokio::test]
async fn wait_closed_tears_down_a_running_tracker() {
    let connector = Arc::new(ConnectorSurface::new(
        Arc::new(FakeRpc::default()),
        Arc::new(FakeSigner),
        &settings(),
    ));

    let (tx, _rx) = mpsc::channel(4);
    connector.new_block_listener(Uuid::new_v4(), tx).await;

    connector.wait_closed().await;
}
