// ABOUTME: Main application orchestration for the labgraph CLI
// ABOUTME: Coordinates between CLI arguments, configuration, and command execution

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands;
use super::{Args, Commands, Config};
use crate::output::{OutputHandler, OutputOptions};

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration. Logs go to stderr so stdout stays parseable.
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        match self.config.logging.format.as_str() {
            "compact" => {
                tracing_subscriber::fmt()
                    .compact()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .try_init()
                    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
            }
            _ => {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .try_init()
                    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
            }
        }

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Run the application with parsed arguments
    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting labgraph v{}", env!("CARGO_PKG_VERSION"));
        debug!("Configuration loaded from: {:?}", args.config);

        if let Some(root) = args.storage_root {
            self.config.storage_root = root;
        }
        debug!("Storage root: {}", self.config.storage_root.display());

        let handler = OutputHandler::new(OutputOptions {
            colored: !args.no_color && self.config.output.colored,
            ..self.config.output.clone()
        });
        let format = args.format;

        match args.command {
            Commands::List { status, task_type } => {
                commands::list_contexts(&self.config, status, task_type, format, &handler).await
            }

            Commands::Show { id } => {
                commands::show_context(&self.config, id, format, &handler).await
            }

            Commands::Delete { id } => commands::delete_context(&self.config, id).await,

            Commands::Gc { dry_run } => {
                commands::collect_garbage(&self.config, dry_run, format, &handler).await
            }

            Commands::Fingerprint {
                task_type,
                discriminators,
                informational,
            } => commands::fingerprint(task_type, discriminators, informational, format, &handler),
        }
    }

    /// Create application from parsed command line arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let config = Config::load(args.config.clone())?;
        Ok(Self::new(config))
    }
}
