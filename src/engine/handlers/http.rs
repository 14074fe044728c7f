use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use super::StepError;

#[derive(Debug, Deserialize)]
pub(crate) struct HttpConfig {
    pub url: Option<String>,
    pub method: Option<String>,
}

pub(crate) fn parse_config(value: &Value) -> Result<(String, Method), StepError> {
    let config: HttpConfig = if value.is_null() {
        HttpConfig {
            url: None,
            method: None,
        }
    } else {
        serde_json::from_value(value.clone())
            .map_err(|_| StepError::InvalidConfig("Invalid http configuration".to_string()))?
    };

    let url = config
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| StepError::InvalidConfig("Http step requires a url".to_string()))?;

    let method = match config.method {
        Some(raw) => Method::from_bytes(raw.trim().to_uppercase().as_bytes())
            .map_err(|_| StepError::InvalidConfig(format!("Unsupported http method '{raw}'")))?,
        None => Method::GET,
    };

    Ok((url, method))
}

/// Issues the outbound request and treats any non-2xx response as a step
/// failure, with the status code in the failure description.
pub(crate) async fn execute(config: &Value, client: &reqwest::Client) -> Result<(), StepError> {
    let (url, method) = parse_config(config)?;

    let response = client
        .request(method, &url)
        .send()
        .await
        .map_err(|source| StepError::Request {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(StepError::Status {
            url,
            status: status.as_u16(),
        });
    }
    Ok(())
}
