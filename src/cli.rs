use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::Override;

#[derive(Parser, Debug)]
#[command(
    name = "ptemplate",
    version,
    about = "Build Proxmox VE Cloud-Init templates from cloud images"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override a setting, e.g. `-o vm_id=9002 template_settings.vm_name=noble`
    #[arg(short = 'o', long = "override", value_name = "KEY=VALUE", num_args = 1..)]
    pub overrides: Vec<Override>,

    /// Show debug logs and keep command output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show step progress
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the commands that would run, without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Output style
    #[arg(long, value_enum, default_value_t = OutputFormat::Auto)]
    pub output: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Spinners on a terminal, plain text otherwise
    Auto,
    /// Plain text, no ANSI
    Plain,
    /// Spinners even when not a terminal
    Fancy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_is_required() {
        assert!(Cli::try_parse_from(["ptemplate"]).is_err());
    }

    #[test]
    fn overrides_repeat_and_take_several_values() {
        let cli = Cli::try_parse_from([
            "ptemplate",
            "-c",
            "settings.yml",
            "-o",
            "vm_id=1",
            "vm_name=a",
            "--override",
            "vm_cores=4",
            "--dry-run",
        ])
        .unwrap();
        let keys: Vec<_> = cli.overrides.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["vm_id", "vm_name", "vm_cores"]);
        assert!(cli.dry_run);
    }

    #[test]
    fn malformed_override_rejected() {
        assert!(Cli::try_parse_from(["ptemplate", "-c", "x.yml", "-o", "novalue"]).is_err());
    }

    #[test]
    fn verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["ptemplate", "-c", "x.yml", "-v", "-q"]).is_err());
    }
}
