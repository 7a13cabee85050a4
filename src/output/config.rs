// ABOUTME: Configuration types for output rendering
// ABOUTME: Selects the output format and which optional fields are shown

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::OutputError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(OutputError::FormatterNotFound {
                format: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOptions {
    #[serde(default = "default_true")]
    pub include_timestamps: bool,
    #[serde(default = "default_true")]
    pub include_duration: bool,
    #[serde(default = "default_true")]
    pub include_discriminators: bool,
    /// Only show failed and skipped nodes of an execution result
    #[serde(default)]
    pub filter_failed: bool,
    #[serde(default = "default_true")]
    pub pretty_print: bool,
    #[serde(default)]
    pub colored: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            include_timestamps: true,
            include_duration: true,
            include_discriminators: true,
            filter_failed: false,
            pretty_print: true,
            colored: false,
        }
    }
}

fn default_true() -> bool {
    true
}
