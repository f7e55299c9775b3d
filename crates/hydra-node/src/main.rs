//! Hydra Node binary
//!
//! One self-healing replica of a Hydra role. The single positional
//! argument is the operator-assigned host id; everything else comes
//! from defaults or the `HYDRA_ADDR_SCHEMA` layout file.

use std::sync::Arc;

use hydra_addr::AddressSchema;
use hydra_directory::{RouteStore, StaticRib};
use hydra_node::{LogSink, NodeConfig, ReplicaNode, ResultSink};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hydra_node=info,hydra=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <host_id>", args[0]);
        std::process::exit(1);
    }
    let host_id: u64 = match args[1].parse() {
        Ok(host_id) => host_id,
        Err(_) => {
            eprintln!("Usage: {} <host_id>", args[0]);
            std::process::exit(1);
        }
    };

    let schema = match load_schema() {
        Ok(schema) => Arc::new(schema),
        Err(e) => {
            eprintln!("invalid address layout: {e}");
            std::process::exit(1);
        }
    };

    // The link-state daemon's route feed plugs in here; standalone runs
    // get the in-memory table.
    let rib: Arc<dyn RouteStore> = Arc::new(StaticRib::new());

    let node = match ReplicaNode::new(
        NodeConfig::default(),
        host_id,
        schema,
        rib,
        Arc::new(LogSink) as Arc<dyn ResultSink>,
    )
    .await
    {
        Ok(node) => node,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    };

    // Termination signals run the shutdown ordering exactly once; the
    // node masks re-entry while it drains.
    let handle = Arc::clone(&node);
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!("cannot install SIGTERM handler: {e}");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(int) => int,
            Err(e) => {
                tracing::warn!("cannot install SIGINT handler: {e}");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = term.recv() => handle.request_shutdown(),
                _ = int.recv() => handle.request_shutdown(),
            }
        }
    });

    tracing::info!(host_id, "starting replica node");
    if let Err(e) = node.run().await {
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
}

/// Load the address layout: `HYDRA_ADDR_SCHEMA` names a layout file,
/// otherwise the canonical layout applies. A bad file is fatal — a
/// half-loaded schema must never be installed.
fn load_schema() -> Result<AddressSchema, Box<dyn std::error::Error>> {
    match std::env::var("HYDRA_ADDR_SCHEMA") {
        Ok(path) => {
            let source = std::fs::read_to_string(&path)?;
            Ok(AddressSchema::parse(&source)?)
        }
        Err(_) => Ok(AddressSchema::canonical()),
    }
}
