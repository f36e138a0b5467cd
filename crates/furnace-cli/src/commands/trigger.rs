//! Direct trigger client.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use url::Url;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-api-key";

fn trigger_body(remote_url: &str, commit_ref: &str, environment: &str) -> Value {
    json!({
        "remoteUrl": remote_url,
        "commitRef": commit_ref,
        "environment": environment,
    })
}

/// Ask the trigger endpoint at `url` to deploy `remote_url` at `commit_ref`.
pub async fn run(
    url: &Url,
    api_key: &str,
    remote_url: &str,
    commit_ref: &str,
    environment: &str,
) -> Result<()> {
    let response = reqwest::Client::new()
        .post(url.clone())
        .header(API_KEY_HEADER, api_key)
        .json(&trigger_body(remote_url, commit_ref, environment))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or_default();
    let message = body
        .get("msg")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if !status.is_success() {
        anyhow::bail!("Trigger rejected ({}): {}", status, message);
    }

    println!("{}", message);
    Ok(())
}
