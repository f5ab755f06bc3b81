use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::extract::SplitLevel;
use crate::stage::SectionFailurePolicy;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rewrite one page for three audience levels and write the JSON document.
    Process(ProcessArgs),
    /// Process many pages in order and write a batch report.
    Batch(BatchArgs),
    /// Print the sections extracted from a page as JSON (no model calls).
    Extract(ExtractArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Heading level that starts a new section (`auto` or 1-6).
    #[arg(long, default_value = "auto")]
    pub split_level: SplitLevel,

    /// What to do when one section fails (`abort` or `omit`).
    #[arg(long, default_value = "abort")]
    pub on_section_failure: SectionFailurePolicy,

    /// Maximum characters of document text sent for summarization.
    #[arg(long, default_value_t = crate::summarize::DEFAULT_MAX_INPUT_CHARS)]
    pub max_summary_chars: usize,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Page URL (http, https or file).
    #[arg(long)]
    pub url: String,

    /// Output directory for the processed document.
    #[arg(long)]
    pub out: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["url", "urls_file"])))]
pub struct BatchArgs {
    /// Page URL; repeat for several pages.
    #[arg(long)]
    pub url: Vec<String>,

    /// File with one URL per line (blank lines and `#` comments are skipped).
    #[arg(long)]
    pub urls_file: Option<String>,

    /// Output directory for processed documents and the batch report.
    #[arg(long)]
    pub out: String,

    /// Delay between documents in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub delay_ms: u64,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["url", "html"])))]
pub struct ExtractArgs {
    /// Page URL to fetch.
    #[arg(long)]
    pub url: Option<String>,

    /// Local HTML file to read instead of fetching.
    #[arg(long)]
    pub html: Option<String>,

    /// Heading level that starts a new section (`auto` or 1-6).
    #[arg(long, default_value = "auto")]
    pub split_level: SplitLevel,
}
