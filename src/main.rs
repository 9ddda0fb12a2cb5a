use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bedledger::config::Config;
use bedledger::facility::FacilityManager;
use bedledger::model::StatusRepair;

/// Outcome of the startup pass over one facility.
#[derive(Debug, Serialize)]
struct FacilityReport {
    facility: String,
    beds: usize,
    repairs: Vec<StatusRepair>,
    compacted: bool,
}

/// Maintenance run: open facilities, repair bed-status drift from the
/// admission/reservation facts, compact WALs that are due, and print a JSON
/// summary.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    bedledger::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let manager = FacilityManager::new(config.data_dir.clone(), config.compact_threshold);

    match &config.facility {
        Some(name) => {
            manager.get_or_create(name)?;
        }
        None => {
            manager.open_all()?;
        }
    }
    info!(
        data_dir = %config.data_dir.display(),
        facilities = manager.facilities().len(),
        "bedledger maintenance run"
    );

    let mut reports = Vec::new();
    for (facility, engine) in manager.facilities() {
        let repairs = engine.repair_status_drift().await?;
        let compacted = manager.compact_if_due(&engine).await?;
        let beds = engine.list_beds().await.len();
        info!(%facility, beds, repairs = repairs.len(), compacted, "facility checked");
        reports.push(FacilityReport {
            facility,
            beds,
            repairs,
            compacted,
        });
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
