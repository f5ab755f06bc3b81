use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{Local, SecondsFormat};
use url::Url;

use crate::cli::BatchArgs;
use crate::document::{file_stamp, unique_path, write_document, write_json_atomic};
use crate::fetch::parse_page_url;
use crate::formats::{BatchRecord, BatchReport, BatchStatus};
use crate::pipeline::{self, Pipeline};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub out_dir: PathBuf,
    pub delay: Duration,
}

pub async fn run_batch(
    pipeline: &Pipeline,
    urls: &[Url],
    options: &BatchOptions,
) -> anyhow::Result<BatchReport> {
    tokio::fs::create_dir_all(&options.out_dir)
        .await
        .with_context(|| format!("create output dir: {}", options.out_dir.display()))?;

    let total = urls.len();
    let mut results = Vec::with_capacity(total);
    for (idx, url) in urls.iter().enumerate() {
        if idx > 0 && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
        tracing::info!(url = %url, index = idx + 1, total, "batch: process");
        results.push(process_one(pipeline, url, &options.out_dir).await);
    }

    let successful = results
        .iter()
        .filter(|r| r.status == BatchStatus::Success)
        .count();
    let report = BatchReport {
        processed_at: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        total_urls: total,
        successful,
        failed: total - successful,
        results,
    };

    let stem = format!("batch_results_{}", file_stamp(Local::now()));
    let path = unique_path(&options.out_dir, &stem).await?;
    write_json_atomic(&path, &report)
        .await
        .context("write batch report")?;
    tracing::info!(
        path = %path.display(),
        successful = report.successful,
        failed = report.failed,
        "batch: done"
    );
    Ok(report)
}

pub async fn run(args: BatchArgs) -> anyhow::Result<()> {
    let mut inputs = args.url.clone();
    if let Some(path) = &args.urls_file {
        let listing = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read urls file: {path}"))?;
        inputs.extend(read_url_list(&listing));
    }
    let urls = inputs
        .iter()
        .map(|input| parse_page_url(input).with_context(|| format!("parse url: {input}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if urls.is_empty() {
        anyhow::bail!("no urls to process");
    }

    let pipeline = pipeline::from_env(&args.pipeline)?;
    let options = BatchOptions {
        out_dir: PathBuf::from(&args.out),
        delay: Duration::from_millis(args.delay_ms),
    };
    let report = run_batch(&pipeline, &urls, &options).await?;
    println!(
        "processed {} of {} urls ({} failed)",
        report.successful, report.total_urls, report.failed
    );
    Ok(())
}

pub fn read_url_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

async fn process_one(pipeline: &Pipeline, url: &Url, out_dir: &Path) -> BatchRecord {
    let mut record = BatchRecord {
        url: url.to_string(),
        status: BatchStatus::Error,
        output: None,
        error: None,
        stage: None,
        section_id: None,
        omitted_sections: Vec::new(),
    };

    let processed = match pipeline.process(url).await {
        Ok(processed) => processed,
        Err(err) => {
            tracing::error!(
                url = %url,
                stage = %err.stage(),
                section_id = err.section_id().unwrap_or_default(),
                error = %err,
                "batch: document failed"
            );
            record.stage = Some(err.stage().to_string());
            record.section_id = err.section_id().map(str::to_owned);
            record.error = Some(err.to_string());
            return record;
        }
    };

    record.omitted_sections = processed
        .omitted
        .iter()
        .map(|omitted| omitted.section_id.clone())
        .collect();
    match write_document(out_dir, &processed.document).await {
        Ok(path) => {
            record.status = BatchStatus::Success;
            record.output = Some(path.display().to_string());
        }
        Err(err) => {
            let message = format!("{err:#}");
            tracing::error!(url = %url, error = %message, "batch: write failed");
            record.error = Some(message);
        }
    }
    record
}
