use async_trait::async_trait;
use dotenvy::dotenv;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::{env, fs};
use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),
    #[error("Error loading config: {0}")]
    ConfigError(String),
}

/// A config section that lives under its own table of a TOML file.
#[async_trait]
pub trait SectionLoader {
    type SectionType;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError>;
}

pub trait SectionLoaderSync {
    type SectionType;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError>;
}

pub async fn load_from_file<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = tokio::fs::read_to_string(file_name).await?;
    parse_config(&contents)
}

pub fn load_from_file_sync<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = fs::read_to_string(file_name)?;
    parse_config(&contents)
}

/// Expand `${VAR}` references from the environment and parse the result as TOML.
pub fn parse_config<T: DeserializeOwned>(raw_config: &str) -> Result<T, LoadConfigError> {
    let contents = expand_vars(raw_config)?;
    Ok(toml::from_str(&contents)?)
}

fn expand_vars(raw_config: &str) -> Result<String, LoadConfigError> {
    // unknown variables are left as written
    let re = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)\}")?;
    Ok(re
        .replace_all(raw_config, |caps: &Captures| match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => caps[0].to_string(),
        })
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Section {
        url: String,
        retries: u32,
    }

    #[test]
    fn test_expand_vars() {
        let path = env::var("PATH").unwrap_or_default();
        let expanded = expand_vars("a = \"${PATH}\"\nb = \"${SURELY_NOT_SET_ANYWHERE_42}\"").unwrap();
        assert_eq!(expanded, format!("a = \"{path}\"\nb = \"${{SURELY_NOT_SET_ANYWHERE_42}}\""));
    }

    #[test]
    fn test_parse_config() {
        let section: Section = parse_config("url = \"http://127.0.0.1:8545\"\nretries = 3").unwrap();
        assert_eq!(section.url, "http://127.0.0.1:8545");
        assert_eq!(section.retries, 3);

        assert!(matches!(parse_config::<Section>("url = 1"), Err(LoadConfigError::TomlError(_))));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = load_from_file::<Section>("/nonexistent/validator.toml".to_string()).await;
        assert!(matches!(result, Err(LoadConfigError::IoError(_))));
    }
}
