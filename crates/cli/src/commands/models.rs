//! `chorus models`: list chat models behind an endpoint.

use chorus_config::AppConfig;
use chorus_core::provider::Provider;
use chorus_core::WireDialect;
use chorus_providers::HttpProvider;
use std::time::Duration;

pub async fn run(endpoint: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let endpoint = endpoint.unwrap_or_else(|| config.endpoint.clone());

    let provider = HttpProvider::new(Duration::from_secs(config.request_timeout_secs))?;
    let models = provider
        .list_models(&endpoint, config.api_key.as_deref())
        .await?;

    println!("  {endpoint} ({})", WireDialect::detect(&endpoint));
    if models.is_empty() {
        println!("  No chat models listed");
        return Ok(());
    }

    for m in &models {
        let quant = m.quantization.as_deref().unwrap_or("-");
        let ctx = m
            .max_context
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        println!("  {:<40} {:<12} {:<10} ctx {}", m.id, m.state, quant, ctx);
    }
    Ok(())
}
