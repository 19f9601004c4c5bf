//! Onboard command — write a starter config and create the workspace.

use anyhow::{Context, Result};
use colored::Colorize;

use evoclaw_core::config::{get_config_path, save_config, Config};
use evoclaw_core::utils::expand_home;

/// Initialize config + workspace. Refuses to overwrite an existing config.
pub fn run() -> Result<()> {
    crate::helpers::print_banner();
    println!();

    let config_path = get_config_path();
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let config = Config::default();
    save_config(&config, None).context("failed to write config")?;
    println!("✓ Wrote {}", config_path.display());

    let workspace = expand_home(&config.tools.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;
    println!("✓ Created workspace {}", workspace.display());

    println!(
        "\n{}\n  1. Add a provider API key under `providers` in the config\n  \
         2. Add agents (or keep the default assistant)\n  \
         3. Run {} to start all channels",
        "Next steps".bold(),
        "evoclaw gateway".cyan()
    );
    Ok(())
}
