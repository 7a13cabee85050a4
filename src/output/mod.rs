// ABOUTME: Output handler module for execution results and stored contexts
// ABOUTME: Dispatches rendering to the JSON, YAML or text formatter

pub mod config;
pub mod error;
pub mod formatter;

use std::collections::HashMap;
use std::io::Write;

pub use self::config::{OutputFormat, OutputOptions};
pub use self::error::{OutputError, Result};
use self::formatter::{JsonFormatter, OutputFormatter, TextFormatter, YamlFormatter};
use crate::engine::{ExecutionResult, TaskContext};

pub struct OutputHandler {
    formatters: HashMap<OutputFormat, Box<dyn OutputFormatter>>,
    options: OutputOptions,
}

impl OutputHandler {
    pub fn new(options: OutputOptions) -> Self {
        let mut handler = Self {
            formatters: HashMap::new(),
            options,
        };

        handler.register_formatter(OutputFormat::Json, Box::new(JsonFormatter::new()));
        handler.register_formatter(OutputFormat::Yaml, Box::new(YamlFormatter::new()));
        handler.register_formatter(OutputFormat::Text, Box::new(TextFormatter::new()));

        handler
    }

    pub fn register_formatter(&mut self, format: OutputFormat, formatter: Box<dyn OutputFormatter>) {
        self.formatters.insert(format, formatter);
    }

    pub fn options(&self) -> &OutputOptions {
        &self.options
    }

    fn formatter(&self, format: OutputFormat) -> Result<&dyn OutputFormatter> {
        self.formatters
            .get(&format)
            .map(|f| f.as_ref())
            .ok_or_else(|| OutputError::FormatterNotFound {
                format: format.to_string(),
            })
    }

    pub fn render_execution_result(
        &self,
        format: OutputFormat,
        result: &ExecutionResult,
    ) -> Result<String> {
        self.formatter(format)?
            .format_execution_result(result, &self.options)
    }

    pub fn render_context(&self, format: OutputFormat, context: &TaskContext) -> Result<String> {
        self.formatter(format)?.format_context(context, &self.options)
    }

    pub fn render_contexts(
        &self,
        format: OutputFormat,
        contexts: &[TaskContext],
    ) -> Result<String> {
        self.formatter(format)?
            .format_contexts(contexts, &self.options)
    }

    /// Write rendered output, adding a trailing newline when the formatter did not
    pub fn write<W: Write>(&self, writer: &mut W, rendered: &str) -> Result<()> {
        writer.write_all(rendered.as_bytes())?;
        if !rendered.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new(OutputOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_write() {
        let handler = OutputHandler::default();
        let rendered = handler.render_contexts(OutputFormat::Json, &[]).unwrap();
        assert_eq!(rendered.trim(), "[]");

        let mut buffer = Vec::new();
        handler.write(&mut buffer, &rendered).unwrap();
        assert!(buffer.ends_with(b"\n"));
    }
}
