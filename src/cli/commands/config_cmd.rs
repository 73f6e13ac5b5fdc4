//! Configuration management commands.

use console::style;

use crate::config::MergeConfig;

/// Print the resolved configuration (the API token is never shown).
pub fn cmd_config_show(config: &MergeConfig) -> anyhow::Result<()> {
    let source = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());
    eprintln!("{} Source: {}", style("→").dim(), source);
    eprintln!(
        "{} Token: {}",
        style("→").dim(),
        if config.store.token.is_some() {
            "set"
        } else {
            "not set"
        }
    );

    print!("{}", config.to_toml()?);
    Ok(())
}
