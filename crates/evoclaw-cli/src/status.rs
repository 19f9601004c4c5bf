//! Status command — show configuration, providers, agents, and channels.

use colored::Colorize;

use evoclaw_core::config::{get_config_path, load_config};

use crate::gateway::{build_agents, build_providers};

/// Print the status summary.
pub fn run() {
    let config_path = get_config_path();
    let config = load_config(None);

    crate::helpers::print_banner();
    println!();

    println!("{}", "Config".bold());
    let exists = if config_path.exists() { "" } else { " (missing, defaults)" };
    println!("  {}{}", config_path.display(), exists);
    println!();

    println!("{}", "Providers".bold());
    let providers = build_providers(&config);
    if providers.is_empty() {
        println!("  {}", "none configured".yellow());
    } else {
        for name in providers.names() {
            println!("  ✓ {name}");
        }
    }
    println!();

    println!("{}", "Agents".bold());
    let agents = build_agents(&config);
    for state in agents.snapshots() {
        let model = if state.def.model.is_empty() {
            format!("(routing default: {})", config.routing.complex)
        } else {
            state.def.model.clone()
        };
        println!("  • {} — {}", state.def.id, model);
    }
    println!();

    println!("{}", "Channels".bold());
    let flags = [
        ("terminal", config.channels.terminal.enabled),
        ("telegram", config.channels.telegram.enabled),
        ("mqtt", config.channels.mqtt.enabled),
        ("http", config.channels.http.enabled),
        ("websocket", config.channels.websocket.enabled),
    ];
    for (name, enabled) in flags {
        let marker = if enabled { "✓".green() } else { "–".dimmed() };
        println!("  {marker} {name}");
    }
}
