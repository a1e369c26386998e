use std::time::Duration;

// ======= Tezos chain parameters =======

/// Approximate time between blocks on Tezos mainnet since the Ithaca protocol upgrade.
/// Used only to size default poll intervals - never assumed exact.
pub const TEZOS_AVERAGE_BLOCK_TIME: Duration = Duration::from_secs(8);

/// Upper bound on how long a single RPC round-trip may take before the retry
/// engine considers the attempt failed.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

// ======= Operation encoding =======

/// Manager-operation batches place the operation whose hash/result the caller
/// cares about at this index out of the four-operation batch (reveal, this
/// operation, ...).
pub const MANAGER_OPERATION_BATCH_INDEX: usize = 3;

/// Tezos operations are watermarked with this tag byte before signing.
pub const GENERIC_OPERATION_WATERMARK: u8 = 0x03;

/// Limits attached to a synthesised reveal content item - reveals are cheap
/// and never simulated on their own, so a fixed allowance is used instead.
pub const DEFAULT_REVEAL_LIMITS: crate::rpc::types::Limits =
    crate::rpc::types::Limits { fee: 374, gas_limit: 1_000, storage_limit: 0 };

// ======= Settings environment variables =======

/// Prefix for environment-variable configuration overrides, e.g.
/// `CONNECTOR__BLOCKCHAIN__RPC`.
pub const ENV_PREFIX: &str = "CONNECTOR";
