use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use log::{error, info};

use asset_ingest::config::{Args, Command};
use asset_ingest::dataset::common_structs::DatasetId;
use asset_ingest::dataset::data_endpoints::{HttpDataEndpoint, HttpWorkerEndpoint};
use asset_ingest::dataset::export::DatasetExporter;
use asset_ingest::ingestion::{
    load_records, prepare_manifest, AcceptancePoller, AssetIngestor, ImageSource,
};
use asset_ingest::sorting::{ImageSorter, ObjectFilter};

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match &args.cmd {
        Command::Ingest {
            account_id,
            data_url,
            dataset_id,
            image,
            labels,
            external_id,
            poll_interval_secs,
            max_poll_attempts,
            upload_timeout_secs,
        } => {
            let records = load_records(labels)
                .with_context(|| format!("reading labels from {}", labels.display()))?;
            let image = ImageSource::from_path(image)
                .with_context(|| format!("reading image {}", image.display()))?;
            let external_id = external_id.clone().unwrap_or_else(|| image.file_name.clone());

            let endpoint = HttpDataEndpoint::new(args.endpoint(data_url), account_id);
            let poller = AcceptancePoller::new(
                Duration::from_secs(*poll_interval_secs),
                *max_poll_attempts,
            );
            let asset = AssetIngestor::new(&endpoint, DatasetId(dataset_id.clone()))
                .with_upload_timeout(Duration::from_secs(*upload_timeout_secs))
                .with_poller(poller)
                .ingest(&image, &external_id, &records)
                .await?;
            info!("Asset details: {}", serde_json::to_string_pretty(&asset)?);
            info!("Data ingestion completed successfully.");
        }
        Command::IngestBatch {
            account_id,
            data_url,
            dataset_id,
            manifest,
            label,
            poll_interval_secs,
            max_poll_attempts,
            upload_timeout_secs,
        } => {
            let prepared = prepare_manifest(manifest, label)
                .await
                .with_context(|| format!("reading manifest {}", manifest.display()))?;

            let endpoint = HttpDataEndpoint::new(args.endpoint(data_url), account_id);
            let poller = AcceptancePoller::new(
                Duration::from_secs(*poll_interval_secs),
                *max_poll_attempts,
            );
            let report = AssetIngestor::new(&endpoint, DatasetId(dataset_id.clone()))
                .with_upload_timeout(Duration::from_secs(*upload_timeout_secs))
                .with_poller(poller)
                .ingest_all(&prepared.items)
                .await;
            for (name, failure) in prepared.skipped.iter().chain(&report.failures) {
                error!("{}: {}", name, failure);
            }
            info!(
                "{} assets ingested, {} images failed",
                report.ingested.len(),
                prepared.skipped.len() + report.failures.len()
            );
        }
        Command::Export {
            account_id,
            data_url,
            dataset_id,
            output_dir,
            ..
        } => {
            let settings = args
                .cmd
                .export_settings()
                .context("export settings missing")?;
            let endpoint = HttpDataEndpoint::new(args.endpoint(data_url), account_id);
            let report = DatasetExporter::new(&endpoint, DatasetId(dataset_id.clone()), settings)
                .export_to(output_dir)
                .await?;
            for failure in &report.failures {
                error!("{}", failure);
            }
            info!(
                "Dataset exported to {} ({} assets skipped)",
                report.annotations_path.display(),
                report.failures.len()
            );
        }
        Command::Sort {
            pop_id,
            worker_url,
            input_dir,
            output_dir,
            label,
            min_confidence,
        } => {
            if !input_dir.is_dir() {
                bail!("The input directory does not exist: {}", input_dir.display());
            }
            let endpoint = HttpWorkerEndpoint::new(args.endpoint(worker_url), pop_id);
            let filter = ObjectFilter {
                label: label.clone(),
                min_confidence: *min_confidence,
            };
            let report = ImageSorter::new(&endpoint, filter)
                .sort(input_dir, output_dir)
                .await?;
            for (path, failure) in &report.failures {
                error!("{}: {}", path.display(), failure);
            }
        }
    }
    Ok(())
}
