//! Replay recorded invoices against two tax calculation endpoints and report how they differ.
use std::sync::Arc;
use std::time::Instant;

use envconfig::Envconfig;
use tracing::info;

use replay_common::metrics::{serve, setup_metrics_router};
use replay_worker::comparison::Comparer;
use replay_worker::config::Config;
use replay_worker::dispatcher::Dispatcher;
use replay_worker::error::{ReplayError, Side};
use replay_worker::report::CsvReport;
use replay_worker::source::{PgRecordSource, RecordSource};
use replay_worker::transport::{Endpoint, HttpTransport};
use replay_worker::version::discover_version;

#[tokio::main]
async fn main() -> Result<(), ReplayError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    if config.export_prometheus {
        let router = setup_metrics_router().expect("failed to install metrics recorder");
        let bind = config.bind();
        tokio::task::spawn(async move {
            serve(router, &bind)
                .await
                .expect("failed to start serving metrics");
        });
    }

    let transport = HttpTransport::new(
        config.max_connections,
        config.request_timeout.0,
        config.accept_invalid_certs,
    )
    .map_err(ReplayError::ClientError)?;

    let endpoint_a = Endpoint::new(
        Side::A,
        &config.endpoint_a,
        config.calculation_path.as_str(),
        config.version_path.as_str(),
    )?;
    let endpoint_b = Endpoint::new(
        Side::B,
        &config.endpoint_b,
        config.calculation_path.as_str(),
        config.version_path.as_str(),
    )?;

    let label = config.version_label.as_str();
    let version_a = discover_version(transport.client(), &endpoint_a, label).await?;
    let version_b = discover_version(transport.client(), &endpoint_b, label).await?;

    let report = CsvReport::create(&config.report_path, &version_a, &version_b).await?;

    let start = Instant::now();
    let source = PgRecordSource::new(
        config.invoice_table.as_str(),
        &config.database_url,
        config.max_pg_connections,
        config.transaction_date_cutoff,
        config.page_size,
    )
    .await?;
    let records = source.fetch(config.record_limit).await?;
    println!(
        "Recordset read in {} seconds",
        start.elapsed().as_secs_f64()
    );

    let start = Instant::now();
    let dispatcher = Dispatcher::new(
        Comparer::new(Arc::new(transport), endpoint_a, endpoint_b),
        Arc::new(report),
        config.max_concurrent_comparisons,
    );
    let summary = dispatcher.run(records).await?;
    println!("Calcs written in {} seconds", start.elapsed().as_secs_f64());

    println!(
        "{} comparisons succeeded, {} failed",
        summary.succeeded, summary.failed
    );
    for (stage, failed) in &summary.failed_by_stage {
        println!("  {} failed at {}", failed, stage);
    }
    info!(report = %config.report_path, "replay finished");

    Ok(())
}
