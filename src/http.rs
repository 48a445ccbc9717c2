use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::DataSource;
use crate::error::BasinError;

pub fn build_client(data_source: DataSource, timeout_secs: u64) -> Result<Client, BasinError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("basin-dm/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| BasinError::unavailable(data_source, err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| BasinError::unavailable(data_source, err.to_string()))
}

pub fn handle_status(data_source: DataSource, response: Response) -> Result<Response, BasinError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| format!("{data_source} request failed"));
    Err(BasinError::unavailable(
        data_source,
        format!("status {status}: {}", truncate(&message, 300)),
    ))
}

pub fn truncate(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}
