#![forbid(unsafe_code)]

pub mod annotate;
pub mod batch;
pub mod cli;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod limiter;
pub mod links;
pub mod logging;
pub mod markdown;
pub mod pipeline;
pub mod rewrite;
pub mod service;
pub mod stage;
pub mod summarize;
