pub mod client;
pub mod signer;
pub mod types;

pub use client::{HttpTezosRpc, TezosRpc};
pub use signer::{HttpSignerClient, SignerClient};
