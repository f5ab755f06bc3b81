use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Local;
use url::Url;

use crate::annotate::annotate_sections;
use crate::cli::{PipelineArgs, ProcessArgs};
use crate::client::LlmClient;
use crate::config::ServiceConfig;
use crate::document::write_document;
use crate::error::{PipelineError, Stage};
use crate::extract::{ExtractOptions, extract_sections};
use crate::fetch::{DEFAULT_FETCH_TIMEOUT, HttpFetcher, PageFetcher, parse_page_url};
use crate::formats::Document;
use crate::rewrite::rewrite_sections;
use crate::stage::{SectionFailurePolicy, StageOptions};
use crate::summarize::{SummaryOptions, summarize};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub extract: ExtractOptions,
    pub on_section_failure: SectionFailurePolicy,
    pub summary: SummaryOptions,
}

impl From<&PipelineArgs> for PipelineOptions {
    fn from(args: &PipelineArgs) -> Self {
        Self {
            extract: ExtractOptions {
                split_level: args.split_level,
            },
            on_section_failure: args.on_section_failure,
            summary: SummaryOptions {
                max_input_chars: args.max_summary_chars,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct OmittedSection {
    pub section_id: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub document: Document,
    pub omitted: Vec<OmittedSection>,
}

#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    client: LlmClient,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn PageFetcher>, client: LlmClient, options: PipelineOptions) -> Self {
        Self {
            fetcher,
            client,
            options,
        }
    }

    pub async fn process(&self, url: &Url) -> Result<ProcessedDocument, PipelineError> {
        let url_str = url.to_string();
        let stage_options = StageOptions {
            on_section_failure: self.options.on_section_failure,
        };

        tracing::info!(url = %url, "process: fetch");
        let html = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|source| PipelineError::Fetch {
                url: url_str.clone(),
                source,
            })?;

        tracing::info!(url = %url, bytes = html.len(), "process: extract");
        let extracted = extract_sections(&html, &self.options.extract).map_err(|source| {
            PipelineError::Extraction {
                url: url_str.clone(),
                source,
            }
        })?;

        tracing::info!(url = %url, sections = extracted.len(), "process: annotate");
        let mut sections = extracted.clone();
        let mut omitted = Vec::new();
        let failures = annotate_sections(&self.client, &mut sections, &stage_options)
            .await
            .map_err(|source| PipelineError::Annotation {
                url: url_str.clone(),
                source,
            })?;
        let dropped: BTreeSet<String> = failures.iter().map(|e| e.section_id.clone()).collect();
        omitted.extend(failures.into_iter().map(|err| OmittedSection {
            section_id: err.section_id.clone(),
            stage: Stage::Annotate,
            reason: err.kind.to_string(),
        }));
        sections.retain(|section| !dropped.contains(&section.id));

        tracing::info!(url = %url, sections = sections.len(), "process: rewrite");
        let report = rewrite_sections(&self.client, &sections, &stage_options)
            .await
            .map_err(|source| PipelineError::Rewrite {
                url: url_str.clone(),
                source,
            })?;
        for err in report.failures {
            if omitted.iter().any(|o: &OmittedSection| o.section_id == err.section_id) {
                continue;
            }
            omitted.push(OmittedSection {
                section_id: err.section_id.clone(),
                stage: Stage::Rewrite,
                reason: format!("{}: {}", err.level, err.kind),
            });
        }

        tracing::info!(url = %url, "process: summarize");
        let summaries = summarize(&self.client, &extracted, &self.options.summary)
            .await
            .map_err(|source| PipelineError::Summarization {
                url: url_str.clone(),
                source,
            })?;

        let document = Document::assemble(&url_str, Local::now(), &summaries, &report.sections);
        if !omitted.is_empty() {
            tracing::warn!(
                url = %url,
                omitted = omitted.len(),
                "document assembled without some sections"
            );
        }
        tracing::info!(url = %url, sections = document.sections.len(), "process: done");

        Ok(ProcessedDocument { document, omitted })
    }
}

pub fn from_env(args: &PipelineArgs) -> anyhow::Result<Pipeline> {
    let config = ServiceConfig::from_env().context("load service config")?;
    let client = LlmClient::from_config(&config).context("build text service client")?;
    let fetcher = HttpFetcher::new(DEFAULT_FETCH_TIMEOUT).context("build page fetcher")?;
    Ok(Pipeline::new(
        Arc::new(fetcher),
        client,
        PipelineOptions::from(args),
    ))
}

pub async fn run(args: ProcessArgs) -> anyhow::Result<()> {
    let url = parse_page_url(&args.url).context("parse --url")?;
    let pipeline = from_env(&args.pipeline)?;

    let processed = pipeline.process(&url).await?;
    for omitted in &processed.omitted {
        tracing::warn!(
            section_id = %omitted.section_id,
            stage = %omitted.stage,
            reason = %omitted.reason,
            "section omitted"
        );
    }

    let path = write_document(Path::new(&args.out), &processed.document)
        .await
        .context("write document")?;
    println!("{}", path.display());
    Ok(())
}
