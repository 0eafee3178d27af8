//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Live-reloading file viewer
#[derive(Parser, Debug)]
#[command(
    name = "livemark",
    version = env!("CARGO_PKG_VERSION"),
    about = "Follow files and re-render them as they change",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print files and re-print them whenever they change
    Follow {
        /// Files to follow
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Print each file as a full HTML page with the user stylesheet
        /// inlined, re-printed when the stylesheet changes too
        #[arg(long)]
        html: bool,
    },

    /// Display active settings
    Config,

    /// Set up .livemark directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_follow_with_config() {
        let cli = Cli::try_parse_from([
            "livemark",
            "follow",
            "a.md",
            "b.md",
            "--config",
            "custom.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Commands::Follow { files, html } => {
                assert_eq!(files, vec![PathBuf::from("a.md"), PathBuf::from("b.md")]);
                assert!(!html);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_follow_requires_files() {
        assert!(Cli::try_parse_from(["livemark", "follow"]).is_err());
    }

    #[test]
    fn test_parse_init_force() {
        let cli = Cli::try_parse_from(["livemark", "init", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Init { force: true }));
    }

    #[test]
    fn test_parse_follow_html() {
        let cli = Cli::try_parse_from(["livemark", "follow", "--html", "a.md"]).unwrap();
        assert!(matches!(cli.command, Commands::Follow { html: true, .. }));
    }
}
