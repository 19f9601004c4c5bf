//! CLI presentation helpers.

use colored::Colorize;

/// Print the startup banner.
pub fn print_banner() {
    println!("{}", "⚙  evoclaw — agent orchestrator".bold().cyan());
}

/// Print an agent response.
pub fn print_response(agent_id: &str, text: &str) {
    println!("\n{} {}\n", format!("[{agent_id}]").green().bold(), text);
}

/// Print an error line.
pub fn print_error(text: &str) {
    eprintln!("\n{} {text}\n", "✗".red().bold());
}

/// Initialize tracing with an env filter; `verbose` lowers the default
/// level to debug.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("evoclaw={default},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
