//! HTTP client for the document store

use crate::error::{HistoryError, HistoryResult};
use crate::retry::retry_with_backoff;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Successful `_search` answer.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResponse {
    /// The `aggregations` object
    Aggregations(Value),
    /// `_source` of every hit, in response order
    Hits(Vec<Value>),
}

impl SearchResponse {
    pub fn aggregations(&self) -> Option<&Value> {
        match self {
            Self::Aggregations(aggs) => Some(aggs),
            Self::Hits(_) => None,
        }
    }

    pub fn hits(&self) -> &[Value] {
        match self {
            Self::Hits(hits) => hits,
            Self::Aggregations(_) => &[],
        }
    }
}

impl From<Value> for SearchResponse {
    fn from(mut payload: Value) -> Self {
        if let Some(aggs) = payload.get_mut("aggregations") {
            return Self::Aggregations(aggs.take());
        }
        let hits = payload
            .pointer_mut("/hits/hits")
            .and_then(Value::as_array_mut)
            .map(std::mem::take)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|mut hit| hit.get_mut("_source").map(Value::take))
            .collect();
        Self::Hits(hits)
    }
}

/// Human-readable reason of an `error` member.
fn error_reason(error: &Value) -> String {
    if let Some(reason) = error.as_str() {
        return reason.to_string();
    }
    let reason = error
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    match error.pointer("/root_cause/0/reason").and_then(Value::as_str) {
        Some(cause) if cause != reason => format!("{}: {}", reason, cause),
        _ => reason.to_string(),
    }
}

/// Turn a raw answer into its JSON body or a store error.
pub fn check_response(status: u16, body: &str) -> HistoryResult<Value> {
    let payload: Value = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(e) if (200..300).contains(&status) => return Err(e.into()),
        Err(_) => {
            return Err(HistoryError::Store {
                status,
                reason: body.chars().take(200).collect(),
            })
        }
    };

    if let Some(error) = payload.get("error") {
        return Err(HistoryError::Store {
            status,
            reason: error_reason(error),
        });
    }
    if !(200..300).contains(&status) {
        return Err(HistoryError::Store {
            status,
            reason: format!("unexpected status {}", status),
        });
    }
    Ok(payload)
}

#[derive(Debug, Clone)]
pub struct StoreClient {
    http: Client,
    attempts: u32,
}

impl StoreClient {
    pub fn new(timeout: Duration, attempts: u32) -> HistoryResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            attempts: attempts.max(1),
        })
    }

    async fn post(&self, endpoint: &str, body: &Value) -> HistoryResult<Value> {
        let http = &self.http;
        retry_with_backoff(endpoint, self.attempts, RETRY_DELAY, || async move {
            let response = http.post(endpoint).json(body).send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            check_response(status, &text)
        })
        .await
    }

    pub async fn search(&self, endpoint: &str, body: &Value) -> HistoryResult<SearchResponse> {
        debug!("POST {}", endpoint);
        Ok(self.post(endpoint, body).await?.into())
    }

    /// Run `_delete_by_query`; returns the number of deleted documents.
    pub async fn delete_by_query(&self, endpoint: &str, body: &Value) -> HistoryResult<u64> {
        debug!("POST {}", endpoint);
        let payload = self.post(endpoint, body).await?;
        if let Some(failures) = payload.get("failures").and_then(Value::as_array) {
            if let Some(first) = failures.first() {
                return Err(HistoryError::Store {
                    status: first.get("status").and_then(Value::as_u64).unwrap_or(500) as u16,
                    reason: format!(
                        "{} delete failures, first: {}",
                        failures.len(),
                        first
                            .get("cause")
                            .map(error_reason)
                            .unwrap_or_else(|| first.to_string())
                    ),
                });
            }
        }
        Ok(payload.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }
}
