//! Fetching study records from the public trials registry.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::time::Duration;

use trialkg_ingest::registry::study_url;

pub fn fetch_study(nct_id: &str, timeout: Duration) -> Result<Value> {
    let url = study_url(nct_id);
    tracing::info!(%url, "fetching study from registry");
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;
    let response = client
        .get(&url)
        .send()
        .with_context(|| format!("request to {url} failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("registry returned {status} for {nct_id}"));
    }
    response
        .json::<Value>()
        .with_context(|| format!("registry response for {nct_id} is not JSON"))
}
