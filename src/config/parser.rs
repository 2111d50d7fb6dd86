use crate::config::types::Config;
use crate::config::validation::validate;
use crate::wiki::NamespaceSet;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, overrides from the environment, and validates a configuration
///
/// # Arguments
///
/// * `path` - Optional path to a TOML configuration file; defaults are used when absent
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns it with the hash of its file, if any
pub fn load_config_with_hash(path: Option<&Path>) -> Result<(Config, Option<String>), ConfigError> {
    let config = load_config(path)?;
    let hash = path.map(compute_config_hash).transpose()?;
    Ok((config, hash))
}

/// Applies `WIKIGRAPH_*` environment overrides on top of file values
///
/// The lookup is injected so tests don't have to touch the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("WIKIGRAPH_DATABASE_URL") {
        config.database.url = v;
    }
    if let Some(v) = lookup("WIKIGRAPH_API_BASE") {
        config.wiki.api_base = v;
    }
    if let Some(v) = lookup("WIKIGRAPH_USER_AGENT") {
        config.wiki.user_agent = v;
    }
    if let Some(v) = lookup("WIKIGRAPH_CONCURRENCY") {
        config.crawler.concurrency = parse_env("WIKIGRAPH_CONCURRENCY", &v)?;
    }
    if let Some(v) = lookup("WIKIGRAPH_POLL_SECONDS") {
        config.crawler.poll_seconds = parse_env("WIKIGRAPH_POLL_SECONDS", &v)?;
    }
    if let Some(v) = lookup("WIKIGRAPH_MAX_LINKS_PER_PAGE") {
        config.crawler.max_links_per_page = parse_env("WIKIGRAPH_MAX_LINKS_PER_PAGE", &v)?;
    }
    if let Some(v) = lookup("WIKIGRAPH_MAX_DEPTH") {
        config.crawler.max_depth = parse_env("WIKIGRAPH_MAX_DEPTH", &v)?;
    }
    if let Some(v) = lookup("WIKIGRAPH_ALLOW_NAMESPACES") {
        config.crawler.allow_namespaces = NamespaceSet::parse(&v)?.to_vec();
    }
    if let Some(v) = lookup("WIKIGRAPH_BIND") {
        config.server.bind = v;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(
            r#"
[database]
url = "./test.db"

[wiki]
api-base = "https://de.wikipedia.org/w/api.php"
user-agent = "TestCrawler/1.0"

[crawler]
concurrency = 3
poll-seconds = 0.5
max-links-per-page = 25
allow-namespaces = [0, 14]
max-depth = 2
"#,
        );

        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.database.url, "./test.db");
        assert_eq!(config.crawler.concurrency, 3);
        assert_eq!(config.crawler.max_links_per_page, 25);
        assert_eq!(config.crawler.allow_namespaces, vec![0, 14]);
        assert_eq!(config.wiki.page_size, 500);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = create_temp_config("");
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.crawler.concurrency, 6);
        assert_eq!(config.crawler.allow_namespaces, vec![0]);
        assert_eq!(config.wiki.user_agent, "WikiGraphExplorer/0.1");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_concurrency_fails_validation() {
        let file = create_temp_config("[crawler]\nconcurrency = 0\n");
        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WIKIGRAPH_CONCURRENCY", "12"),
            ("WIKIGRAPH_ALLOW_NAMESPACES", "0, 14"),
            ("WIKIGRAPH_MAX_LINKS_PER_PAGE", "100"),
            ("WIKIGRAPH_DATABASE_URL", ":memory:"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.crawler.concurrency, 12);
        assert_eq!(config.crawler.allow_namespaces, vec![0, 14]);
        assert_eq!(config.crawler.max_links_per_page, 100);
        assert_eq!(config.database.url, ":memory:");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config, |k| {
            (k == "WIKIGRAPH_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_compute_config_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        assert_eq!(hash1, compute_config_hash(file1.path()).unwrap());
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, compute_config_hash(file2.path()).unwrap());
    }
}
