use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Local, SecondsFormat};
use sha2::Digest as _;
use tokio::fs;

use crate::formats::{Document, Level, LevelEntry, MergedSection, Summaries, SummarySet};
use crate::markdown::render_blocks;
use crate::rewrite::LevelRewrites;

impl Document {
    pub fn assemble(
        url: &str,
        processed_at: DateTime<Local>,
        summaries: &SummarySet,
        sections: &[LevelRewrites],
    ) -> Self {
        let summaries = Summaries {
            content: Level::ALL.map(|level| LevelEntry::paragraph(level, summaries.get(level))),
        };
        let sections = sections
            .iter()
            .map(|rewrites| MergedSection {
                id: rewrites.id.clone(),
                title: rewrites.title.clone(),
                content: Level::ALL.map(|level| {
                    let rewritten = rewrites.get(level);
                    LevelEntry::paragraph(level, render_blocks(&rewritten.content))
                }),
            })
            .collect();

        Self {
            url: url.to_owned(),
            processed_at: processed_at.to_rfc3339_opts(SecondsFormat::Secs, false),
            summaries,
            sections,
        }
    }
}

pub fn doc_id(url: &str) -> String {
    let digest = sha2::Sha256::digest(url.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(12);
    id
}

pub fn file_stamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

pub async fn write_document(out_dir: &Path, document: &Document) -> anyhow::Result<PathBuf> {
    let stem = format!(
        "processed_{}_{}",
        doc_id(&document.url),
        file_stamp(Local::now())
    );
    let path = unique_path(out_dir, &stem).await?;
    write_json_atomic(&path, document).await?;
    tracing::info!(path = %path.display(), url = %document.url, "wrote document");
    Ok(path)
}

pub async fn unique_path(dir: &Path, stem: &str) -> anyhow::Result<PathBuf> {
    let mut candidate = dir.join(format!("{stem}.json"));
    let mut n = 1usize;
    while fs::try_exists(&candidate)
        .await
        .with_context(|| format!("stat output: {}", candidate.display()))?
    {
        candidate = dir.join(format!("{stem}_{n}.json"));
        n += 1;
    }
    Ok(candidate)
}

pub async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
