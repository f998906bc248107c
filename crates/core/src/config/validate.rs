use super::{types::Config, ConfigError};
use crate::stage::Stage;

/// Upper bound for stage timeouts and the stale-claim grace period (7 days).
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound for a single upload request body (1 TiB).
pub const MAX_UPLOAD_MB: usize = 1024 * 1024;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Upload limit is between 1 MB and `MAX_UPLOAD_MB`
/// - Poll interval is not 0
/// - Stale grace is at most `MAX_WAIT_SECS`
/// - Every stage has a program and a timeout between 1 and `MAX_WAIT_SECS`
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.server.max_upload_mb == 0 || config.server.max_upload_mb > MAX_UPLOAD_MB {
        return Err(ConfigError::ValidationError(format!(
            "server.max_upload_mb must be between 1 and {}",
            MAX_UPLOAD_MB
        )));
    }

    if config.poller.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "poller.poll_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.poller.stale_grace_secs > MAX_WAIT_SECS {
        return Err(ConfigError::ValidationError(format!(
            "poller.stale_grace_secs cannot exceed {}",
            MAX_WAIT_SECS
        )));
    }

    for stage in Stage::ALL {
        let command = config.stages.for_stage(stage);
        if command.program.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "stages.{}.program cannot be empty",
                stage
            )));
        }
        if command.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(format!(
                "stages.{}.timeout_secs cannot be 0",
                stage
            )));
        }
        if command.timeout_secs > MAX_WAIT_SECS {
            return Err(ConfigError::ValidationError(format!(
                "stages.{}.timeout_secs cannot exceed {}",
                stage, MAX_WAIT_SECS
            )));
        }
    }

    Ok(())
}
