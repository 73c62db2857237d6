use super::{types::Config, ConfigError};
use crate::remote::TransferMethod;
use crate::transform::CommandSpec;

/// Validate configuration
/// Currently validates:
/// - Book identifier is not empty
/// - Worker bounds and retry attempts are not 0
/// - Transform commands reference both placeholders
/// - Remote section is complete when enabled, with non-zero poll intervals
///   and deadlines
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.book.identifier.trim().is_empty() {
        return invalid("book.identifier cannot be empty");
    }

    if config.runner.max_workers == 0 {
        return invalid("runner.max_workers cannot be 0");
    }
    if config.runner.retry.max_attempts == 0 {
        return invalid("runner.retry.max_attempts cannot be 0");
    }
    if config.archive.max_workers == 0 {
        return invalid("archive.max_workers cannot be 0");
    }
    if config.classifier.max_workers == 0 {
        return invalid("classifier.max_workers cannot be 0");
    }

    for (name, spec) in [
        ("convert", &config.transforms.convert),
        ("deskew", &config.transforms.deskew),
        ("threshold", &config.transforms.threshold),
    ] {
        check_command(name, spec)?;
    }

    let remote = &config.remote;
    if remote.enabled {
        if remote.instance_id.trim().is_empty() {
            return invalid("remote.instance_id is required when remote is enabled");
        }
        if remote.port == 0 {
            return invalid("remote.port cannot be 0");
        }
        if remote.job.model_name.trim().is_empty() {
            return invalid("remote.job.model_name is required when remote is enabled");
        }
        for (name, secs) in [
            ("health_interval_secs", remote.health_interval_secs),
            ("ready_timeout_secs", remote.ready_timeout_secs),
            ("job_poll_interval_secs", remote.job_poll_interval_secs),
            ("job_timeout_secs", remote.job_timeout_secs),
        ] {
            if secs == 0 {
                return invalid(&format!("remote.{name} cannot be 0"));
            }
        }
        if remote.transfer == TransferMethod::Scp
            && remote.api_key.as_ref().map_or(true, |k| k.is_empty())
        {
            return invalid("remote.api_key is required for scp transfer");
        }
        if remote.transfer == TransferMethod::Relay && remote.credential_poll_attempts == 0 {
            return invalid("remote.credential_poll_attempts cannot be 0");
        }
    }

    Ok(())
}

fn check_command(name: &str, spec: &CommandSpec) -> Result<(), ConfigError> {
    if !spec.has_placeholders() {
        return invalid(&format!(
            "transforms.{name} must reference both {{input}} and {{output}}"
        ));
    }
    Ok(())
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.to_string()))
}
