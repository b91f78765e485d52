//! `chorus config`: configuration helpers.

use chorus_config::AppConfig;

pub fn print_default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if config.api_key.is_none() && config.dialect().client_tools() && !is_local(&config.endpoint) {
                warnings.push("No API key set (CHORUS_API_KEY, ANTHROPIC_API_KEY or OPENAI_API_KEY)");
            }
            if config.agent.max_steps > chorus_config::MAX_STEPS_CEILING {
                warnings.push("agent.max_steps is above the ceiling and will be capped");
            }

            for w in &warnings {
                println!("   warning: {w}");
            }

            println!();
            println!("   Endpoint:  {} ({})", config.endpoint, config.dialect());
            println!("   Model:     {}", config.default_model);
            println!("   Slots:     {}", config.admission.max_concurrent_calls);
            println!("   Steps:     {}", config.agent.effective_max_steps());
            println!("   Memory:    {}", config.memory.backend);
            println!("   Personas:  {}", config.resolved_personas().len());
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

fn is_local(endpoint: &str) -> bool {
    endpoint.contains("localhost") || endpoint.contains("127.0.0.1")
}
