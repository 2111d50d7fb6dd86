use crate::config::types::{Config, CrawlerConfig, EstimatorConfig, WikiConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database.url.is_empty() {
        return Err(ConfigError::Validation(
            "database url cannot be empty".to_string(),
        ));
    }
    validate_wiki_config(&config.wiki)?;
    validate_crawler_config(&config.crawler)?;
    validate_estimator_config(&config.estimator)?;
    Ok(())
}

/// Validates the external API settings
fn validate_wiki_config(config: &WikiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.api_base)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api-base: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "api-base must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.page_size < 1 || config.page_size > 500 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 500, got {}",
            config.page_size
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if !(config.poll_seconds.is_finite() && config.poll_seconds > 0.0) {
        return Err(ConfigError::Validation(format!(
            "poll-seconds must be positive, got {}",
            config.poll_seconds
        )));
    }

    if config.allow_namespaces.is_empty() {
        return Err(ConfigError::InvalidNamespaces(
            "at least one namespace must be allowed".to_string(),
        ));
    }

    if let Some(ns) = config.allow_namespaces.iter().find(|ns| **ns < 0) {
        return Err(ConfigError::InvalidNamespaces(format!(
            "namespace {} is negative",
            ns
        )));
    }

    if config.max_consecutive_db_failures < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-db-failures must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_estimator_config(config: &EstimatorConfig) -> Result<(), ConfigError> {
    if config.sample_size < 1 {
        return Err(ConfigError::Validation(
            "estimator sample-size must be >= 1".to_string(),
        ));
    }

    if !(config.overlap_discount > 0.0 && config.overlap_discount <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "overlap-discount must be in (0, 1], got {}",
            config.overlap_discount
        )));
    }

    if config.max_count_pages < 1 {
        return Err(ConfigError::Validation(
            "estimator max-count-pages must be >= 1".to_string(),
        ));
    }

    Ok(())
}
