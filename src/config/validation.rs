use crate::config::types::{Config, ControllerConfig, CrawlerConf, UserAgentConfig};
use crate::parser::ParserRegistry;
use crate::state::CrawlerItem;
use crate::ConfigError;
use url::Url;

/// Upper bound shared by worker counts and crawler weights
pub const MAX_RANGE_VALUE: i64 = 1000;

/// Longest accepted revisit interval: ten years, in seconds
pub const MAX_REVISIT_INTERVAL: i64 = 10 * 365 * 24 * 60 * 60;

/// Validates the entire service configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_controller_config(&config.controller)?;
    validate_user_agent_config(&config.user_agent)?;
    if let Some(proxy) = &config.downloader.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }
    Ok(())
}

/// Checks a value against the (0, 1000] range
pub fn check_range(field: &'static str, value: i64) -> Result<(), ConfigError> {
    if value <= 0 || value > MAX_RANGE_VALUE {
        return Err(ConfigError::WeightRange { field, value });
    }
    Ok(())
}

/// Validates worker pool and sweep settings
pub fn validate_controller_config(config: &ControllerConfig) -> Result<(), ConfigError> {
    check_range("worker-count", config.worker_count)?;

    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.sweep_interval == 0 {
        return Err(ConfigError::Validation(
            "sweep_interval must be >= 1 second".to_string(),
        ));
    }

    if config.processing_budget <= 0 {
        return Err(ConfigError::Validation(format!(
            "processing_budget must be positive, got {}",
            config.processing_budget
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
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

    validate_email(&config.contact_email)
}

/// Validates a crawler item before it is persisted or activated
pub fn validate_crawler_item(
    item: &CrawlerItem,
    registry: &ParserRegistry,
) -> Result<(), ConfigError> {
    validate_crawler_conf(&item.conf, registry)?;

    if item.crawler_name != item.conf.crawler_name {
        return Err(ConfigError::NamesNotConsistent {
            item: item.crawler_name.clone(),
            conf: item.conf.crawler_name.clone(),
        });
    }

    check_range("weight", item.weight)
}

/// Validates a crawler configuration
///
/// Every rule's parser type must resolve in the registry, and the chosen
/// strategy must accept each of the rule's parse steps.
pub fn validate_crawler_conf(
    conf: &CrawlerConf,
    registry: &ParserRegistry,
) -> Result<(), ConfigError> {
    if conf.crawler_name.trim().is_empty() {
        return Err(ConfigError::EmptyCrawlerName);
    }

    match conf.crawler_type.as_str() {
        "navigation" => {
            if conf.start_urls.is_empty() {
                return Err(ConfigError::EmptyStartUrls);
            }
            for start_url in &conf.start_urls {
                Url::parse(start_url).map_err(|e| {
                    ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", start_url, e))
                })?;
            }
        }
        "url_set" => {
            if conf.urls_file.is_empty() {
                return Err(ConfigError::EmptyUrlsFile);
            }
        }
        other => return Err(ConfigError::UnsupportedCrawlerType(other.to_string())),
    }

    if !conf.rules.contains_key(&conf.start_rule_name) {
        return Err(ConfigError::NoStartRule(conf.start_rule_name.clone()));
    }

    check_range("weight", conf.weight)?;

    for (name, rule) in &conf.rules {
        let parser =
            registry
                .get(&rule.parser_type)
                .ok_or_else(|| ConfigError::UnknownParserType {
                    rule: name.clone(),
                    parser_type: rule.parser_type.clone(),
                })?;

        if !(0..=MAX_REVISIT_INTERVAL).contains(&rule.revisit_interval) {
            return Err(ConfigError::RevisitIntervalRange {
                rule: name.clone(),
                value: rule.revisit_interval,
                max: MAX_REVISIT_INTERVAL,
            });
        }

        for step in rule.rules.values().flatten() {
            if step.item_key.is_empty() {
                return Err(ConfigError::InvalidRule {
                    rule: name.clone(),
                    message: "empty item_key".to_string(),
                });
            }
            parser
                .check_rule(step)
                .map_err(|message| ConfigError::InvalidRule {
                    rule: name.clone(),
                    message,
                })?;
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }
    Ok(())
}
