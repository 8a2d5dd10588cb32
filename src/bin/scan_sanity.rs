//! Memo scan sanity runner against a live Horizon server
//!
//! Usage: `scan_sanity <ACCOUNT> <MEMO> [FROM] [TO]`
//!
//! Loads configuration (file + `STM_` env), initialises logging and runs a
//! single memo scan, printing progress events as they arrive. Ctrl-C cancels
//! the scan cleanly.

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stm_ledger::application::MemoScanner;
use stm_ledger::domain::events::{ProgressSink, ScanProgress};
use stm_ledger::infrastructure::{AppConfig, HorizonClient, logging};
use stm_ledger::{LedgerError, ScanRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("usage: scan_sanity <ACCOUNT> <MEMO> [FROM] [TO]");
    }

    let config_path = std::env::var_os("STM_CONFIG").map(std::path::PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    logging::init_logging_with_config(&config.logging)?;

    let from = args.get(2).map_or("", String::as_str);
    let to = args.get(3).map_or("", String::as_str);
    let request = ScanRequest::from_user_input(&args[0], &args[1], from, to)?
        .with_page_size(config.scan.page_size);

    info!("🚀 Scan sanity runner against {}", config.horizon.base_url);
    let client = HorizonClient::new(&config.horizon)?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, cancelling scan");
            ctrl_c_token.cancel();
        }
    });

    let (progress, mut events) = ProgressSink::<ScanProgress>::channel(config.scan.progress_buffer);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(
                "[{}] page {} ops {} matches {} progress {:.0}% eta {}ms",
                event.phase,
                event.page,
                event.ops_total,
                event.matches,
                event.progress * 100.0,
                event.eta_ms
            );
        }
    });

    let scanner = MemoScanner::from_config(&client, &config);
    let result = scanner.scan(&request, &progress, &cancel).await;
    drop(progress);
    let _ = printer.await;

    match result {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(LedgerError::Aborted) => {
            warn!("Scan cancelled");
            Ok(())
        }
        Err(error) => {
            let class = error.class();
            Err(error).context(format!("Scan failed ({})", class.as_str()))
        }
    }
}
