//! Binary entrypoint: parses CLI options, loads and validates settings, and
//! runs the connector surface until cancelled.

use std::sync::Arc;

use clap::Parser;
use reqwest::Url;

use tezosconnect::connector::ConnectorSurface;
use tezosconnect::logging;
use tezosconnect::rpc::{HttpSignerClient, HttpTezosRpc};
use tezosconnect::settings::{CommandLineOptions, Command, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CommandLineOptions::parse();

    match options.command {
        Some(Command::Version { output, short }) => {
            print_version(&output, short);
            return Ok(());
        },
        Some(Command::Docs) => {
            println!("{}", Settings::describe());
            return Ok(());
        },
        None => {},
    }

    logging::init();
    tezosconnect::metrics::register_metrics();

    let settings = Settings::load(options.config.as_deref())?.validate()?;

    let rpc = Arc::new(HttpTezosRpc::new(Url::parse(&settings.rpc_url)?));
    let signer_url = settings
        .signatory_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("connector.blockchain.signatory is required to run the connector"))?;
    let signer = Arc::new(HttpSignerClient::new(Url::parse(&signer_url)?));

    let connector = Arc::new(ConnectorSurface::new(rpc, signer, &settings));

    tracing::info!(
        network = %settings.network,
        rpc_url = %settings.rpc_url,
        "tezosconnect starting"
    );

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");

    connector.wait_closed().await;
    Ok(())
}

fn print_version(output: &str, short: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if short {
        println!("{version}");
        return;
    }
    match output {
        "yaml" => {
            let doc = serde_json::json!({ "version": version });
            print!("{}", serde_yaml::to_string(&doc).unwrap_or_default());
        },
        "json" => println!("{}", serde_json::json!({ "version": version })),
        _ => println!("tezosconnect {version}"),
    }
}
