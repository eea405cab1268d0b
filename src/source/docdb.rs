use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::MetadataSource;
use crate::config::MetadataConfig;
use crate::error::SourceError;

/// REST client for the metadata document database.
#[derive(Clone)]
pub struct DocDbClient {
  http: Client,
  base: Url,
  page_size: u64,
}

impl DocDbClient {
  pub fn new(config: &MetadataConfig) -> Result<Self, SourceError> {
    let base = Self::base_url(config)?;

    let http = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .gzip(true)
      .build()
      .map_err(|e| SourceError::new(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base,
      page_size: config.page_size.max(1),
    })
  }

  /// `https://{host}/{version}/{database}/{collection}`. The host may carry
  /// its own scheme (e.g. `http://localhost:8080`).
  fn base_url(config: &MetadataConfig) -> Result<Url, SourceError> {
    let root = if config.host.contains("://") {
      config.host.clone()
    } else {
      format!("https://{}", config.host)
    };

    let mut url = Url::parse(&root)
      .map_err(|e| SourceError::new(format!("Invalid metadata host '{}': {}", config.host, e)))?;

    url
      .path_segments_mut()
      .map_err(|_| SourceError::new(format!("Metadata host '{}' cannot be a base", config.host)))?
      .pop_if_empty()
      .extend([&config.version, &config.database, &config.collection]);

    Ok(url)
  }

  fn endpoint(&self, name: &str) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.push(name);
    }
    url
  }

  async fn find_page(
    &self,
    filter: &Value,
    projection: &Value,
    limit: u64,
    skip: u64,
  ) -> Result<Vec<Value>, SourceError> {
    let url = self.endpoint("find");
    debug!(%url, limit, skip, "Retrieving records");

    let response = self
      .http
      .get(url)
      .query(&[
        ("filter", filter.to_string()),
        ("projection", projection.to_string()),
        ("limit", limit.to_string()),
        ("skip", skip.to_string()),
      ])
      .send()
      .await
      .map_err(|e| SourceError::new(format!("Failed to retrieve records: {}", e)))?;

    parse_records(response).await
  }
}

#[async_trait]
impl MetadataSource for DocDbClient {
  async fn retrieve(
    &self,
    filter: Value,
    projection: Value,
    limit: u64,
  ) -> Result<Vec<Value>, SourceError> {
    if limit > 0 {
      return self.find_page(&filter, &projection, limit, 0).await;
    }

    let mut records = Vec::new();
    loop {
      let page = self
        .find_page(&filter, &projection, self.page_size, records.len() as u64)
        .await?;
      let page_len = page.len() as u64;
      records.extend(page);

      if page_len < self.page_size {
        break;
      }
    }

    Ok(records)
  }

  async fn aggregate(&self, pipeline: Value) -> Result<Vec<Value>, SourceError> {
    let url = self.endpoint("aggregate");
    debug!(%url, "Running aggregation");

    let response = self
      .http
      .post(url)
      .json(&pipeline)
      .send()
      .await
      .map_err(|e| SourceError::new(format!("Failed to run aggregation: {}", e)))?;

    parse_records(response).await
  }
}

async fn parse_records(response: reqwest::Response) -> Result<Vec<Value>, SourceError> {
  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(SourceError::new(format!(
      "Metadata database returned {}: {}",
      status, body
    )));
  }

  let body: Value = response
    .json()
    .await
    .map_err(|e| SourceError::new(format!("Failed to parse response: {}", e)))?;

  match body {
    Value::Array(records) => Ok(records),
    other => Err(SourceError::new(format!(
      "Expected a list of records, got {}",
      type_name(&other)
    ))),
  }
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(host: &str) -> MetadataConfig {
    MetadataConfig {
      host: host.to_string(),
      ..MetadataConfig::default()
    }
  }

  #[test]
  fn test_base_url_defaults_to_https() {
    let client = DocDbClient::new(&config("api.allenneuraldynamics.org")).unwrap();
    assert_eq!(
      client.endpoint("find").as_str(),
      "https://api.allenneuraldynamics.org/v2/metadata_index/data_assets/find"
    );
  }

  #[test]
  fn test_base_url_keeps_explicit_scheme_and_path() {
    let client = DocDbClient::new(&config("http://localhost:8080/proxy/")).unwrap();
    assert_eq!(
      client.endpoint("aggregate").as_str(),
      "http://localhost:8080/proxy/v2/metadata_index/data_assets/aggregate"
    );
  }

  #[test]
  fn test_invalid_host_is_rejected() {
    assert!(DocDbClient::new(&config("http://")).is_err());
  }
}
