use crate::config::types::{
    BackendConfig, BackendKind, Config, CrawlerConfig, DomainEntry, SinkConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Upper bound on shards; each shard is one worker task
const MAX_SHARDS: u32 = 1024;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_backend_config(&config.backend)?;
    validate_sink_config(&config.sink)?;
    validate_domain_entries(&config.deny)?;
    validate_domain_entries(&config.allow)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.shard_count < 1 || config.shard_count > MAX_SHARDS {
        return Err(ConfigError::Validation(format!(
            "shard_count must be between 1 and {}, got {}",
            MAX_SHARDS, config.shard_count
        )));
    }

    let non_zero = [
        ("fetch_timeout_ms", config.fetch_timeout_ms),
        ("queue_poll_timeout_ms", config.queue_poll_timeout_ms),
        ("backend_retry_ms", config.backend_retry_ms),
        ("visited_ttl_secs", config.visited_ttl_secs),
        ("max_crawl_delay_secs", config.max_crawl_delay_secs),
    ];
    for (name, value) in non_zero {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be > 0", name)));
        }
    }

    if config.link_channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "link_channel_capacity must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // The name doubles as the robots.txt product token
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates backend connection parameters
fn validate_backend_config(config: &BackendConfig) -> Result<(), ConfigError> {
    match config.kind {
        BackendKind::Sqlite if config.database_path.is_empty() => Err(ConfigError::Validation(
            "database_path cannot be empty for the sqlite backend".to_string(),
        )),
        BackendKind::Redis if config.redis_url.is_empty() => Err(ConfigError::Validation(
            "redis_url cannot be empty for the redis backend".to_string(),
        )),
        BackendKind::Redis => {
            Url::parse(&config.redis_url)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid redis_url: {}", e)))?;
            Ok(())
        }
        BackendKind::Sqlite => Ok(()),
    }?;

    if config.key_prefix.is_empty() || config.key_prefix.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "key_prefix must be non-empty and contain no whitespace, got '{}'",
            config.key_prefix
        )));
    }

    Ok(())
}

fn validate_sink_config(config: &SinkConfig) -> Result<(), ConfigError> {
    if config.capacity == 0 {
        return Err(ConfigError::Validation(
            "sink capacity must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// Validates deny/allow domain entries
fn validate_domain_entries(domains: &[DomainEntry]) -> Result<(), ConfigError> {
    for entry in domains {
        validate_domain_pattern(&entry.domain)?;
    }
    Ok(())
}

/// Validates extra seed URLs and appends them to the configured seeds
///
/// Used for seeds given on the command line, so a bad one is rejected before any
/// crawler loop starts.
pub fn add_seeds(config: &mut Config, extra: &[String]) -> Result<(), ConfigError> {
    validate_seeds(extra)?;
    config.seeds.extend(extra.iter().cloned());
    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }
    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::Validation(format!("Invalid email format: '{}'", email));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(invalid());
    }

    Ok(())
}
