use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;

use super::StepError;

fn default_seconds() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub(crate) struct DelayConfig {
    #[serde(default = "default_seconds")]
    pub seconds: f64,
}

pub(crate) fn parse_config(value: &Value) -> Result<DelayConfig, StepError> {
    if value.is_null() {
        return Ok(DelayConfig {
            seconds: default_seconds(),
        });
    }
    let config: DelayConfig = serde_json::from_value(value.clone())
        .map_err(|_| StepError::InvalidConfig("Invalid delay configuration".to_string()))?;
    if !config.seconds.is_finite() || config.seconds < 0.0 {
        return Err(StepError::InvalidConfig(format!(
            "Delay seconds must be a non-negative number, got {}",
            config.seconds
        )));
    }
    Ok(config)
}

/// Sleeps for the configured number of seconds. Suspension is cooperative:
/// the scheduling task stays parked on the timer without holding anything
/// else up.
pub(crate) async fn execute(config: &Value) -> Result<(), StepError> {
    let config = parse_config(config)?;
    let delay = Duration::try_from_secs_f64(config.seconds)
        .map_err(|_| StepError::InvalidConfig("Delay duration is too large".to_string()))?;
    if !delay.is_zero() {
        sleep(delay).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_config_defaults_to_one_second() {
        let config = parse_config(&Value::Null).expect("null config should parse");
        assert_eq!(config.seconds, 1.0);

        let config = parse_config(&json!({})).expect("empty config should parse");
        assert_eq!(config.seconds, 1.0);
    }

    #[test]
    fn negative_seconds_are_rejected() {
        let err = parse_config(&json!({"seconds": -2})).expect_err("negative should fail");
        assert!(matches!(err, StepError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_config_is_rejected() {
        let err = parse_config(&json!({"seconds": "soon"})).expect_err("string should fail");
        assert!(matches!(err, StepError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn zero_seconds_completes_immediately() {
        execute(&json!({"seconds": 0}))
            .await
            .expect("zero delay should succeed");
    }
}
