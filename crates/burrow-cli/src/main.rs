mod cli;
mod cmd;
mod config_gen;
mod dispatch;
mod format;
mod signal;

use clap::Parser;

use burrow_core::config;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // `config` runs without a config file
    if let Commands::Config { dest } = &cli.command {
        if let Err(e) = config_gen::run_config_generate(dest.as_deref()) {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
        return;
    }

    let Some(source) = config::resolve_config_path(cli.config.as_deref()) else {
        eprintln!("ERROR: no configuration file found.");
        eprintln!("Searched:");
        for (path, level) in config::default_config_search_paths() {
            eprintln!("  {} ({})", path.display(), level);
        }
        eprintln!();
        eprintln!("Run `burrow config` to generate a starter config file.");
        std::process::exit(1);
    };
    tracing::info!("Using config: {source}");

    let cfg = match config::load_config(source.path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };

    signal::install_signal_handlers();
    tracing::debug!(command = cli.command.name(), "dispatching");
    if let Err(e) = dispatch::dispatch_command(&cli.command, &cfg, cli.instance.as_deref()) {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}
