use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_DEPLOYMENT: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: Option<String>,
    pub api_key: String,
    pub rate_limit_delay: Duration,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry_attempts: usize,
    pub retry_base_delay: Duration,
    pub concurrency: usize,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let api_key = get("OPENAI_API_KEY")
            .or_else(|| get("AZURE_OPENAI_API_KEY"))
            .ok_or_else(|| {
                anyhow::anyhow!("missing OPENAI_API_KEY (or AZURE_OPENAI_API_KEY) in environment")
            })?;

        let endpoint = get("DOCLEVELS_OPENAI_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());
        let endpoint = endpoint.trim_end_matches('/').to_owned();
        url::Url::parse(&endpoint)
            .with_context(|| format!("invalid DOCLEVELS_OPENAI_ENDPOINT={endpoint:?}"))?;

        Ok(Self {
            endpoint,
            deployment: get("DOCLEVELS_OPENAI_DEPLOYMENT")
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_owned()),
            api_version: get("DOCLEVELS_OPENAI_API_VERSION"),
            api_key,
            rate_limit_delay: Duration::from_millis(parse_var(
                &get,
                "DOCLEVELS_RATE_LIMIT_DELAY_MS",
                1000,
            )?),
            max_tokens: parse_var(&get, "DOCLEVELS_MAX_TOKENS", 2000)?,
            timeout: Duration::from_secs(parse_var(&get, "DOCLEVELS_TIMEOUT_SECS", 120)?),
            retry_attempts: parse_var(&get, "DOCLEVELS_RETRY_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(parse_var(
                &get,
                "DOCLEVELS_RETRY_BASE_DELAY_MS",
                1000,
            )?),
            concurrency: parse_var::<usize, _>(&get, "DOCLEVELS_CONCURRENCY", 1)?.max(1),
        })
    }
}

fn parse_var<T, G>(get: &G, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid {name}={raw:?}")),
        None => Ok(default),
    }
}
