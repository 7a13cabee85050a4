// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the maintenance CLI structure and subcommands for labgraph

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::discriminator::{Discriminator, DiscriminatorSet, DiscriminatorValue};
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "labgraph")]
#[command(about = "Inspect and maintain fingerprinted experiment contexts")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(
        short,
        long,
        global = true,
        default_value = "text",
        value_parser = parse_output_format,
        help = "Output format (text, json, yaml)"
    )]
    pub format: OutputFormat,

    #[arg(long, global = true, help = "Override the configured storage root")]
    pub storage_root: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List stored contexts
    List {
        #[arg(long, help = "Only show contexts with this status")]
        status: Option<String>,

        #[arg(long = "type", help = "Only show contexts of this task type")]
        task_type: Option<String>,
    },

    /// Show one context with its discriminators and artifacts
    Show {
        #[arg(help = "Context id or unique prefix")]
        id: String,
    },

    /// Destroy a context and everything stored under it
    Delete {
        #[arg(help = "Context id or unique prefix")]
        id: String,
    },

    /// Destroy every failed context
    Gc {
        #[arg(long, help = "Only list what would be removed")]
        dry_run: bool,
    },

    /// Compute the context id of a configuration
    Fingerprint {
        #[arg(help = "Task type identifier")]
        task_type: String,

        #[arg(help = "Discriminators (key=value)")]
        discriminators: Vec<String>,

        #[arg(
            short = 'i',
            long = "info",
            help = "Informational values that do not affect the id (key=value)"
        )]
        informational: Vec<String>,
    },
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse::<OutputFormat>().map_err(|e| e.to_string())
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse discriminators from key=value format.
    ///
    /// Values are read as integer, float or boolean when they look like one.
    pub fn parse_discriminators(
        discriminating: &[String],
        informational: &[String],
    ) -> anyhow::Result<DiscriminatorSet> {
        let mut set = DiscriminatorSet::new();

        for (entries, is_discriminating) in [(discriminating, true), (informational, false)] {
            for entry in entries {
                let Some((key, value)) = entry.split_once('=') else {
                    return Err(anyhow::anyhow!(
                        "Invalid discriminator format '{}'. Expected 'key=value'",
                        entry
                    ));
                };

                let value = DiscriminatorValue::parse_literal(value);
                let discriminator = if is_discriminating {
                    Discriminator::new(key, value)
                } else {
                    Discriminator::informational(key, value)
                };
                set.insert(discriminator)?;
            }
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_discriminators() {
        let discriminating = vec![
            "algo=svm".to_string(),
            "seed=42".to_string(),
            "lr=0.5".to_string(),
            "shuffle=true".to_string(),
        ];
        let informational = vec!["note=first try".to_string()];

        let parsed = Args::parse_discriminators(&discriminating, &informational).unwrap();

        assert_eq!(parsed.get("algo"), Some(&DiscriminatorValue::from("svm")));
        assert_eq!(parsed.get("seed"), Some(&DiscriminatorValue::Integer(42)));
        assert_eq!(parsed.get("lr"), Some(&DiscriminatorValue::Float(0.5)));
        assert_eq!(parsed.get("shuffle"), Some(&DiscriminatorValue::Boolean(true)));
        assert_eq!(parsed.discriminating().count(), 4);
        assert_eq!(parsed.len(), 5);
    }

    #[test]
    fn test_parse_discriminators_invalid() {
        assert!(Args::parse_discriminators(&["invalid_format".to_string()], &[]).is_err());
        assert!(
            Args::parse_discriminators(&["a=1".to_string(), "a=2".to_string()], &[]).is_err()
        );
    }

    #[test]
    fn test_global_format_flag() {
        let args = Args::try_parse_from(["labgraph", "list", "--format", "json"]).unwrap();
        assert_eq!(args.format, OutputFormat::Json);
        assert!(Args::try_parse_from(["labgraph", "list", "--format", "xml"]).is_err());
    }
}
