use anyhow::anyhow;
use clap::Parser;
use livemark::Settings;
use livemark::cli::commands::{follow, init};
use livemark::cli::{Cli, Commands};

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow!("failed to load settings: {e}"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        // Init must work before any settings file exists.
        Commands::Init { force } => {
            livemark::logging::init();
            init::run_init(*force)
        }
        Commands::Config => {
            let settings = load_settings(&cli)?;
            livemark::logging::init_with_config(&settings.logging);
            init::run_config(&settings)
        }
        Commands::Follow { files, html } => {
            let settings = load_settings(&cli)?;
            livemark::logging::init_with_config(&settings.logging);
            follow::run(files.clone(), *html, &settings)
        }
    }
}
