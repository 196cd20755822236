// InfluxDB reading source implementation
use crate::application::reading_source::ReadingSource;
use crate::domain::sample::Sample;
use crate::infrastructure::config::{prepare_query, InfluxSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct InfluxReadingSource {
    client: reqwest::Client,
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    source: String,
    latest_query: String,
    history_query: String,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxReadingSource {
    pub fn new(settings: &InfluxSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            database: settings.database.clone(),
            retention_policy: settings.retention_policy.clone(),
            source: settings.source.clone(),
            latest_query: settings.latest_query.clone(),
            history_query: settings.history_query.clone(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host, self.database, self.retention_policy, encoded_query
        )
    }

    fn render(&self, template: &str, hours: Option<u32>) -> String {
        let mut vars = HashMap::new();
        vars.insert("source".to_string(), self.source.clone());
        if let Some(hours) = hours {
            vars.insert("hours".to_string(), hours.to_string());
        }
        prepare_query(template, &vars)
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);
        tracing::debug!("Executing pH query: {}", query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = data.results.first().and_then(|r| r.error.as_ref()) {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }
}

/// Extract (time, value) rows as samples; rows with a null or unparsable cell are skipped
fn parse_samples(response: &InfluxQLResponse) -> Vec<Sample> {
    let mut samples = Vec::new();

    let Some(series) = response.results.first().and_then(|r| r.series.as_ref()) else {
        return samples;
    };

    for s in series {
        let time_idx = s.columns.iter().position(|c| c == "time").unwrap_or(0);
        let value_idx = s
            .columns
            .iter()
            .position(|c| c == "value" || c == "last" || c == "mean")
            .unwrap_or(1);

        for row in &s.values {
            let (Some(time), Some(value)) = (row.get(time_idx), row.get(value_idx)) else {
                continue;
            };
            let (Some(time_str), Some(value)) = (time.as_str(), value.as_f64()) else {
                continue;
            };

            match DateTime::parse_from_rfc3339(time_str) {
                Ok(time) => samples.push(Sample::new(time.with_timezone(&Utc), value)),
                Err(e) => tracing::warn!("Ignoring pH row with bad timestamp {}: {}", time_str, e),
            }
        }
    }

    samples
}

#[async_trait]
impl ReadingSource for InfluxReadingSource {
    async fn latest_reading(&self) -> Result<Option<Sample>> {
        let query = self.render(&self.latest_query, None);
        let response = self.execute_query(&query).await?;
        Ok(parse_samples(&response).into_iter().max_by_key(|s| s.timestamp))
    }

    async fn readings_since(&self, hours: u32) -> Result<Vec<Sample>> {
        let query = self.render(&self.history_query, Some(hours));
        let response = self.execute_query(&query).await?;

        let mut samples = parse_samples(&response);
        samples.sort_by_key(|s| s.timestamp);
        tracing::debug!("Fetched {} pH readings for {}", samples.len(), self.source);
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> InfluxSettings {
        InfluxSettings {
            host: "http://influx:8086/".to_string(),
            token: "secret".to_string(),
            database: "apex".to_string(),
            retention_policy: "autogen".to_string(),
            source: "Great_Barrier_".to_string(),
            latest_query: "SELECT last(value) FROM apex_probe WHERE host = '${source}'".to_string(),
            history_query: "SELECT value FROM apex_probe WHERE host = '${source}' AND time >= now() - ${hours}h"
                .to_string(),
        }
    }

    #[test]
    fn test_query_url_is_encoded() {
        let source = InfluxReadingSource::new(&settings());
        let query = source.render(&source.history_query, Some(24));

        assert_eq!(
            query,
            "SELECT value FROM apex_probe WHERE host = 'Great_Barrier_' AND time >= now() - 24h"
        );
        let url = source.build_query_url(&query);
        assert!(url.starts_with("http://influx:8086/query?db=apex&rp=autogen&q=SELECT%20value"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn test_parse_samples_skips_null_and_bad_rows() {
        let body = r#"{
            "results": [{
                "series": [{
                    "name": "apex_probe",
                    "columns": ["time", "value"],
                    "values": [
                        ["2025-06-01T00:00:00Z", 8.21],
                        ["2025-06-01T00:05:00Z", null],
                        ["not a time", 8.1],
                        ["2025-06-01T00:10:00.5Z", 8.05]
                    ]
                }]
            }]
        }"#;
        let response: InfluxQLResponse = serde_json::from_str(body).unwrap();

        let samples = parse_samples(&response);

        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], Sample::new(start, 8.21));
        assert_eq!(
            samples[1],
            Sample::new(start + chrono::Duration::milliseconds(600_500), 8.05)
        );
    }

    #[test]
    fn test_parse_samples_reads_aggregate_column() {
        let body = r#"{"results":[{"series":[{"name":"apex_probe","columns":["time","last"],"values":[["2025-06-01T01:00:00Z",8.3]]}]}]}"#;
        let response: InfluxQLResponse = serde_json::from_str(body).unwrap();

        let samples = parse_samples(&response);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 8.3);
    }

    #[test]
    fn test_parse_samples_without_series() {
        let response: InfluxQLResponse =
            serde_json::from_str(r#"{"results":[{"statement_id":0}]}"#).unwrap();
        assert!(parse_samples(&response).is_empty());
    }
}
