use crate::config::types::{
    Config, CrawlerConfig, ExtractConfig, HostOverride, ScopeConfig, ServerConfig,
    StorageConfig, UserAgentConfig,
};
use crate::storage::RESERVED_QUERY_KEYS;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use std::net::SocketAddr;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    validate_server_config(&config.server)?;
    validate_seeds(&config.seeds)?;
    validate_host_overrides(&config.hosts)?;
    validate_scope(&config.scope)?;
    validate_extract_config(&config.extract)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    if config.max_concurrency_per_host < 1 {
        return Err(ConfigError::Validation(format!(
            "max_concurrency_per_host must be >= 1, got {}",
            config.max_concurrency_per_host
        )));
    }

    if config.fetch_timeout < 100 {
        return Err(ConfigError::Validation(format!(
            "fetch_timeout must be >= 100ms, got {}ms",
            config.fetch_timeout
        )));
    }

    if config.dequeue_timeout < 10 {
        return Err(ConfigError::Validation(format!(
            "dequeue_timeout must be >= 10ms, got {}ms",
            config.dequeue_timeout
        )));
    }

    if config.frontier_capacity < 1 {
        return Err(ConfigError::Validation(
            "frontier_capacity must be >= 1".to_string(),
        ));
    }

    if config.channel_capacity < 1 {
        return Err(ConfigError::Validation(
            "channel_capacity must be >= 1".to_string(),
        ));
    }

    if config.retry_priority_penalty < 0 || config.link_priority_step < 0 {
        return Err(ConfigError::Validation(
            "retry_priority_penalty and link_priority_step cannot be negative".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Crawler name: non-empty, alphanumeric + hyphens only
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

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    config.bind_address.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!(
            "bind_address '{}' is not a socket address: {}",
            config.bind_address, e
        ))
    })?;
    Ok(())
}

/// Validates seed URLs: must parse and use http or https
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

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' has no host",
                seed
            )));
        }
    }
    Ok(())
}

fn validate_host_overrides(hosts: &[HostOverride]) -> Result<(), ConfigError> {
    for entry in hosts {
        validate_host_pattern(&entry.pattern)?;
    }
    Ok(())
}

fn validate_scope(scope: &ScopeConfig) -> Result<(), ConfigError> {
    for pattern in scope.allow.iter().chain(scope.deny.iter()) {
        validate_host_pattern(pattern)?;
    }
    Ok(())
}

/// Validates the extraction schema: unique names, parseable selectors, known hash fields
fn validate_extract_config(config: &ExtractConfig) -> Result<(), ConfigError> {
    Selector::parse(&config.link_selector).map_err(|e| ConfigError::InvalidSelector {
        field: "link-selector".to_string(),
        message: format!("{:?}", e),
    })?;

    if config.fields.is_empty() {
        return Err(ConfigError::Validation(
            "at least one extract field is required".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for field in &config.fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "extract field name cannot be empty".to_string(),
            ));
        }

        // record queries treat these keys as filters of their own
        if RESERVED_QUERY_KEYS.contains(&field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "extract field name '{}' is reserved by the record query API",
                field.name
            )));
        }

        if !names.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate extract field '{}'",
                field.name
            )));
        }

        Selector::parse(&field.selector).map_err(|e| ConfigError::InvalidSelector {
            field: field.name.clone(),
            message: format!("{:?}", e),
        })?;
    }

    for hash_field in &config.hash_fields {
        if !names.contains(hash_field.as_str()) {
            return Err(ConfigError::Validation(format!(
                "hash field '{}' is not an extract field",
                hash_field
            )));
        }
    }

    Ok(())
}

/// Validates a host pattern (supports a leading "*." wildcard and an optional port)
fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Host pattern cannot be empty".to_string(),
        ));
    }

    let host = pattern.strip_prefix("*.").unwrap_or(pattern);
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.parse::<u16>().is_ok() => name,
        _ => host,
    };

    validate_host_string(host)
}

/// Validates a host string (without wildcard prefix or port)
fn validate_host_string(host: &str) -> Result<(), ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::InvalidPattern("Host cannot be empty".to_string()));
    }

    if !host
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' contains invalid characters",
            host
        )));
    }

    if host.starts_with('.') || host.ends_with('.') || host.starts_with('-') || host.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' cannot start or end with '.' or '-'",
            host
        )));
    }

    if host.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' cannot contain consecutive dots",
            host
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;

    #[test]
    fn test_validate_host_pattern() {
        assert!(validate_host_pattern("example.com").is_ok());
        assert!(validate_host_pattern("*.example.com").is_ok());
        assert!(validate_host_pattern("localhost").is_ok());
        assert!(validate_host_pattern("127.0.0.1:8080").is_ok());

        assert!(validate_host_pattern("").is_err());
        assert!(validate_host_pattern("*.").is_err());
        assert!(validate_host_pattern(".example.com").is_err());
        assert!(validate_host_pattern("example.com.").is_err());
        assert!(validate_host_pattern("exa mple.com").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_validate_seeds() {
        assert!(validate_seeds(&["https://example.com/".to_string()]).is_ok());
        assert!(validate_seeds(&["http://127.0.0.1:3000/".to_string()]).is_ok());
        assert!(validate_seeds(&["ftp://example.com/".to_string()]).is_err());
        assert!(validate_seeds(&["not a url".to_string()]).is_err());
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut extract = ExtractConfig::default();
        extract.fields.push(FieldConfig {
            name: "broken".to_string(),
            selector: "div[".to_string(),
            attribute: None,
            multiple: false,
            required: false,
        });

        let err = validate_extract_config(&extract).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelector { field, .. } if field == "broken"));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut extract = ExtractConfig::default();
        extract.fields.push(extract.fields[0].clone());
        assert!(validate_extract_config(&extract).is_err());
    }

    #[test]
    fn test_reserved_field_names_rejected() {
        for reserved in ["since", "until", "url", "limit"] {
            let mut extract = ExtractConfig::default();
            extract.fields.push(FieldConfig {
                name: reserved.to_string(),
                selector: "span.value".to_string(),
                attribute: None,
                multiple: false,
                required: false,
            });

            let err = validate_extract_config(&extract).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Validation(msg) if msg.contains("reserved")),
                "{}: {}",
                reserved,
                err
            );
        }
    }

    #[test]
    fn test_unknown_hash_field_rejected() {
        let extract = ExtractConfig {
            hash_fields: vec!["missing".to_string()],
            ..ExtractConfig::default()
        };
        assert!(validate_extract_config(&extract).is_err());
    }

    #[test]
    fn test_empty_schema_rejected() {
        let extract = ExtractConfig {
            fields: Vec::new(),
            ..ExtractConfig::default()
        };
        assert!(validate_extract_config(&extract).is_err());
    }

    #[test]
    fn test_zero_crawl_delay_allowed() {
        let config = CrawlerConfig {
            crawl_delay: 0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_ok());
    }
}
