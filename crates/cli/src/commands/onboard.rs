//! `flowpilot onboard`: first-time setup.

use flowpilot_config::AppConfig;
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let default_path = AppConfig::config_dir().join("config.toml");
    let config_path = config_path.unwrap_or(&default_path);

    println!("FlowPilot: first-time setup");
    println!("===========================\n");

    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("✅ Created config directory: {}", dir.display());
    }

    if config_path.exists() {
        println!("  Config file exists: {}", config_path.display());
        AppConfig::load_from(config_path)?;
        println!("✅ Config file is valid");
    } else {
        std::fs::write(config_path, AppConfig::default_toml())?;
        println!("✅ Created config file: {}", config_path.display());
    }

    println!();
    println!("Next: set FLOWPILOT_API_KEY (or api_key in the config) and run");
    println!("  flowpilot ask \"Is there a Slack integration?\"");
    Ok(())
}
