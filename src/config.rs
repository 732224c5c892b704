use std::env;

use reqwest::Url;

use crate::error::ConfigError;
use crate::storage::{self, FileConfig};

const URL_VARS: [&str; 2] = ["CLIENTTIME_SUPABASE_URL", "SUPABASE_URL"];
const KEY_VARS: [&str; 2] = ["CLIENTTIME_SUPABASE_ANON_KEY", "SUPABASE_ANON_KEY"];

/// Backend endpoint and anonymous key. Both are required before any data
/// operation is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: String,
}

impl BackendConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources(|name| env::var(name).ok(), storage::read_config())
    }

    pub fn from_sources<F>(lookup: F, file: Option<FileConfig>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();

        let url = first_non_empty(&lookup, &URL_VARS)
            .or_else(|| non_empty(file.supabase_url))
            .ok_or(ConfigError::MissingUrl)?;
        let anon_key = first_non_empty(&lookup, &KEY_VARS)
            .or_else(|| non_empty(file.supabase_anon_key))
            .ok_or(ConfigError::MissingAnonKey)?;

        let url = parse_base_url(&url)?;
        Ok(Self { url, anon_key })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        self.url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ConfigError::InvalidUrl(err.to_string()))
    }
}

fn first_non_empty<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names.iter().find_map(|name| non_empty(lookup(name)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    // A trailing slash keeps Url::join from dropping the last path segment.
    let normalized = if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    };
    let url =
        Url::parse(&normalized).map_err(|err| ConfigError::InvalidUrl(format!("{value}: {err}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{value}: expected an http(s) URL"
        )));
    }
    Ok(url)
}
