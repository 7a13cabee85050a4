// ABOUTME: Output formatters for execution results and stored contexts (JSON, YAML, text)
// ABOUTME: Handles serialization and presentation of node outcomes and context records

use serde_json::{self, Value as JsonValue};

use super::config::OutputOptions;
use super::error::{OutputError, Result};
use crate::engine::{ContextStatus, ExecutionResult, NodeOutcome, NodeStatus, TaskContext};

pub trait OutputFormatter: Send + Sync {
    fn format_execution_result(
        &self,
        result: &ExecutionResult,
        options: &OutputOptions,
    ) -> Result<String>;

    fn format_context(&self, context: &TaskContext, options: &OutputOptions) -> Result<String>;

    fn format_contexts(&self, contexts: &[TaskContext], options: &OutputOptions)
        -> Result<String>;
}

pub struct JsonFormatter {
    pretty: bool,
}

pub struct YamlFormatter;

pub struct TextFormatter;

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn new_pretty() -> Self {
        Self { pretty: true }
    }

    fn render(&self, value: &JsonValue, options: &OutputOptions) -> Result<String> {
        if self.pretty || options.pretty_print {
            serde_json::to_string_pretty(value).map_err(OutputError::SerializationError)
        } else {
            serde_json::to_string(value).map_err(OutputError::SerializationError)
        }
    }
}

fn seconds(duration: std::time::Duration) -> JsonValue {
    serde_json::Number::from_f64(duration.as_secs_f64())
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn include_node(node: &NodeOutcome, options: &OutputOptions) -> bool {
    !options.filter_failed || !node.is_completed()
}

fn prepare_execution_output(
    result: &ExecutionResult,
    options: &OutputOptions,
) -> Result<JsonValue> {
    let mut output = serde_json::Map::new();

    output.insert(
        "root_task_type".to_string(),
        JsonValue::String(result.root_task_type.clone()),
    );
    output.insert(
        "run_id".to_string(),
        JsonValue::String(result.run_id.clone()),
    );
    output.insert(
        "status".to_string(),
        JsonValue::String(result.status.to_string()),
    );

    if options.include_timestamps {
        output.insert(
            "start_time".to_string(),
            JsonValue::String(result.start_time.to_rfc3339()),
        );
        if let Some(end_time) = result.end_time {
            output.insert(
                "end_time".to_string(),
                JsonValue::String(end_time.to_rfc3339()),
            );
        }
    }

    if options.include_duration {
        if let Some(duration) = result.duration {
            output.insert("duration_seconds".to_string(), seconds(duration));
        }
    }

    output.insert(
        "summary".to_string(),
        serde_json::to_value(&result.summary)?,
    );

    let nodes = result
        .nodes
        .iter()
        .filter(|node| include_node(node, options))
        .map(|node| prepare_node_output(node, options))
        .collect();
    output.insert("nodes".to_string(), JsonValue::Array(nodes));

    Ok(JsonValue::Object(output))
}

fn prepare_node_output(node: &NodeOutcome, options: &OutputOptions) -> JsonValue {
    let mut output = serde_json::Map::new();

    output.insert(
        "task_type".to_string(),
        JsonValue::String(node.task_type.clone()),
    );
    output.insert(
        "status".to_string(),
        JsonValue::String(node.status.to_string()),
    );
    if let Some(ref context_id) = node.context_id {
        output.insert(
            "context_id".to_string(),
            JsonValue::String(context_id.to_string()),
        );
    }
    output.insert("cache_hit".to_string(), JsonValue::Bool(node.cache_hit));

    if options.include_duration {
        if let Some(duration) = node.duration {
            output.insert("duration_seconds".to_string(), seconds(duration));
        }
    }

    if let Some(ref error) = node.error {
        output.insert(
            "error".to_string(),
            serde_json::json!({ "kind": error.kind.to_string(), "message": error.message }),
        );
    }

    if !node.report_errors.is_empty() {
        output.insert(
            "report_errors".to_string(),
            JsonValue::Array(
                node.report_errors
                    .iter()
                    .cloned()
                    .map(JsonValue::String)
                    .collect(),
            ),
        );
    }

    JsonValue::Object(output)
}

fn prepare_context_output(context: &TaskContext, options: &OutputOptions) -> Result<JsonValue> {
    let mut output = serde_json::Map::new();

    output.insert("id".to_string(), JsonValue::String(context.id.to_string()));
    output.insert(
        "task_type".to_string(),
        JsonValue::String(context.task_type.clone()),
    );
    output.insert(
        "status".to_string(),
        JsonValue::String(context.status.to_string()),
    );

    if options.include_discriminators {
        let mut discriminators = serde_json::Map::new();
        for discriminator in context.discriminators.iter() {
            discriminators.insert(
                discriminator.key.clone(),
                serde_json::json!({
                    "value": discriminator.value.to_string(),
                    "discriminating": discriminator.discriminating,
                }),
            );
        }
        output.insert(
            "discriminators".to_string(),
            JsonValue::Object(discriminators),
        );
    }

    output.insert(
        "upstream".to_string(),
        JsonValue::Array(
            context
                .upstream
                .iter()
                .map(|id| JsonValue::String(id.to_string()))
                .collect(),
        ),
    );
    output.insert(
        "artifacts".to_string(),
        JsonValue::Array(
            context
                .artifacts
                .keys()
                .cloned()
                .map(JsonValue::String)
                .collect(),
        ),
    );

    if let Some(ref error) = context.error {
        output.insert("error".to_string(), serde_json::to_value(error)?);
    }
    if context.cancelled {
        output.insert("cancelled".to_string(), JsonValue::Bool(true));
    }

    if options.include_timestamps {
        output.insert(
            "created_at".to_string(),
            JsonValue::String(context.created_at.to_rfc3339()),
        );
        if let Some(started_at) = context.started_at {
            output.insert(
                "started_at".to_string(),
                JsonValue::String(started_at.to_rfc3339()),
            );
        }
        if let Some(finished_at) = context.finished_at {
            output.insert(
                "finished_at".to_string(),
                JsonValue::String(finished_at.to_rfc3339()),
            );
        }
    }

    if options.include_duration {
        if let Some(duration) = context.duration() {
            output.insert("duration_seconds".to_string(), seconds(duration));
        }
    }

    Ok(JsonValue::Object(output))
}

fn prepare_contexts_output(
    contexts: &[TaskContext],
    options: &OutputOptions,
) -> Result<JsonValue> {
    let items = contexts
        .iter()
        .map(|context| prepare_context_output(context, options))
        .collect::<Result<Vec<_>>>()?;
    Ok(JsonValue::Array(items))
}

impl OutputFormatter for JsonFormatter {
    fn format_execution_result(
        &self,
        result: &ExecutionResult,
        options: &OutputOptions,
    ) -> Result<String> {
        self.render(&prepare_execution_output(result, options)?, options)
    }

    fn format_context(&self, context: &TaskContext, options: &OutputOptions) -> Result<String> {
        self.render(&prepare_context_output(context, options)?, options)
    }

    fn format_contexts(
        &self,
        contexts: &[TaskContext],
        options: &OutputOptions,
    ) -> Result<String> {
        self.render(&prepare_contexts_output(contexts, options)?, options)
    }
}

impl OutputFormatter for YamlFormatter {
    fn format_execution_result(
        &self,
        result: &ExecutionResult,
        options: &OutputOptions,
    ) -> Result<String> {
        let json_value = prepare_execution_output(result, options)?;
        serde_yaml::to_string(&json_value).map_err(OutputError::YamlSerializationError)
    }

    fn format_context(&self, context: &TaskContext, options: &OutputOptions) -> Result<String> {
        let json_value = prepare_context_output(context, options)?;
        serde_yaml::to_string(&json_value).map_err(OutputError::YamlSerializationError)
    }

    fn format_contexts(
        &self,
        contexts: &[TaskContext],
        options: &OutputOptions,
    ) -> Result<String> {
        let json_value = prepare_contexts_output(contexts, options)?;
        serde_yaml::to_string(&json_value).map_err(OutputError::YamlSerializationError)
    }
}

impl Default for YamlFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl YamlFormatter {
    pub fn new() -> Self {
        Self
    }
}

fn node_icon(status: NodeStatus, cache_hit: bool) -> &'static str {
    match status {
        NodeStatus::Completed if cache_hit => "↺",
        NodeStatus::Completed => "✓",
        NodeStatus::Failed => "✗",
        NodeStatus::Skipped => "⊘",
    }
}

fn context_icon(status: ContextStatus) -> &'static str {
    match status {
        ContextStatus::Completed => "✓",
        ContextStatus::Failed => "✗",
        ContextStatus::Pending => "⧖",
        ContextStatus::Running => "⟳",
    }
}

impl OutputFormatter for TextFormatter {
    fn format_execution_result(
        &self,
        result: &ExecutionResult,
        options: &OutputOptions,
    ) -> Result<String> {
        let mut output = String::new();

        output.push_str(&format!(
            "Execution: {} ({})\n",
            result.root_task_type, result.run_id
        ));
        output.push_str(&format!("Status: {}\n", result.status));

        if options.include_timestamps {
            output.push_str(&format!(
                "Started: {}\n",
                result.start_time.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            if let Some(end_time) = result.end_time {
                output.push_str(&format!(
                    "Completed: {}\n",
                    end_time.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
        }

        if options.include_duration {
            if let Some(duration) = result.duration {
                output.push_str(&format!("Duration: {:.2}s\n", duration.as_secs_f64()));
            }
        }

        let summary = &result.summary;
        output.push_str("\nSummary:\n");
        output.push_str(&format!("  Total tasks: {}\n", summary.total_tasks));
        output.push_str(&format!("  Executed: {}\n", summary.executed_tasks));
        output.push_str(&format!("  Cache hits: {}\n", summary.cache_hits));
        output.push_str(&format!("  Failed: {}\n", summary.failed_tasks));
        output.push_str(&format!("  Skipped: {}\n", summary.skipped_tasks));
        output.push_str(&format!("  Success rate: {:.1}%\n", summary.success_rate));

        let nodes: Vec<&NodeOutcome> = result
            .nodes
            .iter()
            .filter(|node| include_node(node, options))
            .collect();

        if !nodes.is_empty() {
            output.push_str("\nTasks:\n");
            for node in nodes {
                output.push_str(&format!(
                    "  {} {}",
                    node_icon(node.status, node.cache_hit),
                    node.task_type
                ));
                if let Some(ref context_id) = node.context_id {
                    output.push_str(&format!(" [{}]", context_id.short()));
                }
                if node.cache_hit {
                    output.push_str(" (cached)");
                }
                if options.include_duration && !node.cache_hit {
                    if let Some(duration) = node.duration {
                        output.push_str(&format!(" {:.2}s", duration.as_secs_f64()));
                    }
                }
                output.push('\n');

                if let Some(ref error) = node.error {
                    output.push_str(&format!("      Error: {}\n", error));
                }
                for report_error in &node.report_errors {
                    output.push_str(&format!("      Report: {}\n", report_error));
                }
            }
        }

        Ok(output)
    }

    fn format_context(&self, context: &TaskContext, options: &OutputOptions) -> Result<String> {
        let mut output = String::new();

        output.push_str(&format!("Context: {}\n", context.id));
        output.push_str(&format!("Task type: {}\n", context.task_type));
        output.push_str(&format!(
            "Status: {} {}\n",
            context_icon(context.status),
            context.status
        ));

        if options.include_discriminators && !context.discriminators.is_empty() {
            output.push_str("\nDiscriminators:\n");
            for discriminator in context.discriminators.iter() {
                output.push_str(&format!("  {} = {}", discriminator.key, discriminator.value));
                if !discriminator.discriminating {
                    output.push_str(" (informational)");
                }
                output.push('\n');
            }
        }

        if !context.upstream.is_empty() {
            output.push_str("\nUpstream:\n");
            for upstream in &context.upstream {
                output.push_str(&format!("  {}\n", upstream));
            }
        }

        if !context.artifacts.is_empty() {
            output.push_str("\nArtifacts:\n");
            for name in context.artifacts.keys() {
                output.push_str(&format!("  {}\n", name));
            }
        }

        if let Some(ref error) = context.error {
            output.push_str(&format!("\nError: {}\n", error));
            if context.cancelled {
                output.push_str("Cancelled: yes\n");
            }
        }

        if options.include_timestamps {
            output.push_str(&format!(
                "\nCreated: {}\n",
                context.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        if options.include_duration {
            if let Some(duration) = context.duration() {
                output.push_str(&format!("Duration: {:.2}s\n", duration.as_secs_f64()));
            }
        }

        Ok(output)
    }

    fn format_contexts(
        &self,
        contexts: &[TaskContext],
        options: &OutputOptions,
    ) -> Result<String> {
        if contexts.is_empty() {
            return Ok("No contexts found\n".to_string());
        }

        let mut output = String::new();
        for context in contexts {
            output.push_str(&format!(
                "{} {} {:<10} {}",
                context_icon(context.status),
                context.id.short(),
                context.status.to_string(),
                context.task_type
            ));
            if options.include_discriminators {
                let rendered: Vec<String> = context
                    .discriminators
                    .discriminating()
                    .map(|d| format!("{}={}", d.key, d.value))
                    .collect();
                if !rendered.is_empty() {
                    output.push_str(&format!(" {}", rendered.join(" ")));
                }
            }
            output.push('\n');
        }
        output.push_str(&format!("\n{} context(s)\n", contexts.len()));

        Ok(output)
    }
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }
}
