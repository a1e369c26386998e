//! Wire types exchanged with the node and the remote signer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type BlockHash = String;
pub type Address = String;
pub type OperationHash = String;

/// `(height, hash, parent)` - the only thing the chain tracker retains per block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimalBlock {
    pub height: i64,
    pub hash: BlockHash,
    pub parent: BlockHash,
}

/// Selects which block a façade call addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSelector {
    Head,
    Height(i64),
    Hash(BlockHash),
}

/// A node header-monitor notification: identical shape to [`MinimalBlock`] but
/// kept distinct since it arrives from a different channel (the streaming
/// endpoint, not a `get_block` response).
pub type HeaderNotification = MinimalBlock;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockInfo {
    pub height: i64,
    pub hash: BlockHash,
    pub parent: BlockHash,
    pub timestamp: Option<String>,
    /// Transaction hashes from the manager-operations batch only (batch index
    /// [`crate::constants::MANAGER_OPERATION_BATCH_INDEX`]).
    pub transaction_hashes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccountState {
    pub counter: i64,
    pub revealed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Limits {
    pub fee: i64,
    pub gas_limit: i64,
    pub storage_limit: i64,
}

/// Content items are a tagged union; `kind()` dispatches without a `match` at
/// every call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentItem {
    Transaction {
        source: Address,
        destination: Address,
        counter: i64,
        amount: String,
        parameters: Option<Value>,
        #[serde(flatten)]
        limits: Limits,
    },
    Reveal {
        source: Address,
        counter: i64,
        public_key: String,
        #[serde(flatten)]
        limits: Limits,
    },
    Origination {
        source: Address,
        counter: i64,
        script: Value,
        balance: String,
        #[serde(flatten)]
        limits: Limits,
    },
}

impl ContentItem {
    pub fn kind(&self) -> &'static str {
        match self {
            ContentItem::Transaction { .. } => "transaction",
            ContentItem::Reveal { .. } => "reveal",
            ContentItem::Origination { .. } => "origination",
        }
    }

    pub fn counter(&self) -> i64 {
        match self {
            ContentItem::Transaction { counter, .. }
            | ContentItem::Reveal { counter, .. }
            | ContentItem::Origination { counter, .. } => *counter,
        }
    }

    pub fn set_counter(&mut self, new_counter: i64) {
        match self {
            ContentItem::Transaction { counter, .. }
            | ContentItem::Reveal { counter, .. }
            | ContentItem::Origination { counter, .. } => *counter = new_counter,
        }
    }

    pub fn limits(&self) -> Limits {
        match self {
            ContentItem::Transaction { limits, .. }
            | ContentItem::Reveal { limits, .. }
            | ContentItem::Origination { limits, .. } => *limits,
        }
    }

    pub fn set_limits(&mut self, new_limits: Limits) {
        match self {
            ContentItem::Transaction { limits, .. }
            | ContentItem::Reveal { limits, .. }
            | ContentItem::Origination { limits, .. } => *limits = new_limits,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub source: Address,
    pub branch: BlockHash,
    pub network: String,
    pub contents: Vec<ContentItem>,
    pub signature: Option<String>,
}

impl Operation {
    /// The bytes the signer watermarks and signs: forward-declared Michelson
    /// encoding is out of scope here, so the placeholder encoding is the
    /// canonical JSON form, which is sufficient for round-tripping within this
    /// connector's own simulate/sign/broadcast chain.
    pub fn watermarked_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![crate::constants::GENERIC_OPERATION_WATERMARK];
        bytes.extend_from_slice(serde_json::to_vec(self).unwrap_or_default().as_slice());
        bytes
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentSimulationResult {
    pub consumed_gas: i64,
    pub storage_size: i64,
    pub paid_storage_size_diff: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub error: Option<String>,
    pub content_results: Vec<ContentSimulationResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptContentResult {
    pub kind: String,
    pub source: Address,
    pub destination: Option<Address>,
    pub counter: i64,
    pub fee: i64,
    pub status: String,
    pub consumed_milligas: i64,
    pub storage_size: i64,
    pub paid_storage_size_diff: i64,
    pub storage_limit: i64,
    pub gas_limit: i64,
    pub error_message: Option<String>,
    pub storage: Option<Value>,
    pub originated_contract: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationReceipt {
    pub block_hash: BlockHash,
    pub block_number: i64,
    pub tx_index: i64,
    pub protocol_id: String,
    pub success: bool,
    pub content_results: Vec<ReceiptContentResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExtraInfo {
    Transaction {
        consumed_gas: i64,
        gas_limit: i64,
        storage_size: i64,
        paid_storage_size_diff: i64,
        storage_limit: i64,
        source: Address,
        destination: Address,
        counter: i64,
        fee: i64,
        status: String,
        error_message: Option<String>,
        storage: Option<Value>,
    },
    Origination {
        source: Address,
        counter: i64,
        originated_contract: Option<Address>,
        storage: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractLocation {
    pub address: Address,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionReceipt {
    pub block_number: i64,
    pub block_hash: BlockHash,
    pub tx_index: i64,
    pub success: bool,
    pub protocol_id: String,
    pub contract_location: Option<ContractLocation>,
    pub extra_info: Vec<ExtraInfo>,
}
