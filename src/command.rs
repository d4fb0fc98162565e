use crate::command::{config::ConfigAction, settings::resolve_settings};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{subscriber, Level};
use tracing_subscriber::{fmt::writer::MakeWriterExt, FmtSubscriber};

mod config;
mod settings;
mod start;
mod store;
mod system;

#[derive(Subcommand)]
pub enum CommandSystem {
    Prune {
        #[arg(default_value_t = false, long)]
        all: bool,

        #[arg(long)]
        exports: bool,

        #[arg(long)]
        uploads: bool,
    },
}

#[derive(Subcommand)]
pub enum Command {
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Start the API server
    Start {
        #[arg(long)]
        cache_backend: Option<String>,

        #[arg(long)]
        database_backend: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    #[clap(subcommand)]
    System(CommandSystem),
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project settings file
    #[arg(default_value = "ikated.toml", global = true, long)]
    config: PathBuf,

    // Log level
    #[arg(default_value_t = Level::INFO, global = true, long)]
    level: Level,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let Cli {
        command,
        config: config_path,
        level,
    } = cli;

    let subscriber_writer = std::io::stderr.with_max_level(level);

    let mut subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(subscriber_writer)
        .without_time();

    if [Level::DEBUG, Level::TRACE].contains(&level) {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    let subscriber = subscriber.finish();

    subscriber::set_global_default(subscriber).expect("setting default subscriber");

    match &command {
        Command::Config { action } => match action {
            None | Some(ConfigAction::Show) => config::handle_show(&config_path),
            Some(ConfigAction::Get { key }) => config::handle_get(&config_path, key),
            Some(ConfigAction::Set { key, value }) => config::handle_set(&config_path, key, value),
        },

        Command::Start {
            cache_backend,
            database_backend,
            port,
        } => {
            let mut settings = resolve_settings(&config_path)?;

            if let Some(port) = port {
                settings.override_with_flag("port", port.to_string());
            }

            if let Some(backend) = database_backend {
                settings.override_with_flag("database_backend", backend.clone());
            }

            if let Some(backend) = cache_backend {
                settings.override_with_flag("cache_backend", backend.clone());
            }

            start::run(settings.server_config()?).await
        }

        Command::System(system) => match system {
            CommandSystem::Prune {
                all,
                exports,
                uploads,
            } => {
                let server = resolve_settings(&config_path)?.server_config()?;

                system::prune::run(
                    &server.export_dir,
                    &server.upload_dir,
                    server.download_ttl,
                    *all,
                    *exports,
                    *uploads,
                )
                .await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_flags_parse() {
        let cli = Cli::try_parse_from([
            "ikated",
            "start",
            "--port",
            "8080",
            "--database-backend",
            "local",
            "--cache-backend",
            "local",
            "--level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.level, Level::DEBUG);
        assert_eq!(cli.config, PathBuf::from("ikated.toml"));

        let Command::Start {
            cache_backend,
            database_backend,
            port,
        } = cli.command
        else {
            panic!("expected start");
        };

        assert_eq!(port, Some(8080));
        assert_eq!(database_backend.as_deref(), Some("local"));
        assert_eq!(cache_backend.as_deref(), Some("local"));
    }

    #[test]
    fn config_defaults_to_show() {
        let cli = Cli::try_parse_from(["ikated", "config", "--config", "other.toml"]).unwrap();

        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(cli.command, Command::Config { action: None }));

        let cli = Cli::try_parse_from(["ikated", "config", "set", "port", "4000"]).unwrap();

        assert!(matches!(
            cli.command,
            Command::Config {
                action: Some(ConfigAction::Set { .. })
            }
        ));
    }

    #[test]
    fn prune_flags_parse() {
        let cli = Cli::try_parse_from(["ikated", "system", "prune", "--exports"]).unwrap();

        assert!(matches!(
            cli.command,
            Command::System(CommandSystem::Prune {
                all: false,
                exports: true,
                uploads: false,
            })
        ));

        assert!(Cli::try_parse_from(["ikated", "start", "--port", "nope"]).is_err());
    }
}
