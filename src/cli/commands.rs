// ABOUTME: Command implementations for the labgraph CLI
// ABOUTME: Handles list, show, delete, gc and fingerprint against the configured store

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

use super::args::Args;
use super::config::Config;
use crate::discriminator::ContextId;
use crate::engine::{ContextStatus, TaskConfiguration, TaskContextFactory};
use crate::output::{OutputFormat, OutputHandler};
use crate::storage::{FileSystemStorage, StorageService};

/// Open the configured store behind a context factory
pub async fn open_factory(config: &Config) -> Result<TaskContextFactory> {
    let storage = FileSystemStorage::open(&config.storage_root)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to open storage at {}: {}",
                config.storage_root.display(),
                e
            )
        })?;
    debug!("Opened storage at {}", config.storage_root.display());

    Ok(TaskContextFactory::new(Arc::new(storage)))
}

fn emit(handler: &OutputHandler, rendered: &str) -> Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    handler.write(&mut lock, rendered)?;
    Ok(())
}

/// Resolve a full id or a unique prefix of one
async fn resolve_context_id(storage: &dyn StorageService, raw: &str) -> Result<ContextId> {
    if let Ok(id) = ContextId::parse(raw) {
        return Ok(id);
    }

    let prefix = raw.to_ascii_lowercase();
    if prefix.is_empty() {
        return Err(anyhow::anyhow!("Context id must not be empty"));
    }

    let mut matches: Vec<ContextId> = storage
        .list_contexts()
        .await?
        .into_iter()
        .filter(|id| id.as_str().starts_with(&prefix))
        .collect();

    match matches.len() {
        0 => Err(anyhow::anyhow!("No context matches '{}'", raw)),
        1 => Ok(matches.swap_remove(0)),
        n => Err(anyhow::anyhow!(
            "Context prefix '{}' is ambiguous ({} matches)",
            raw,
            n
        )),
    }
}

/// List stored contexts, optionally filtered by status and task type
pub async fn list_contexts(
    config: &Config,
    status: Option<String>,
    task_type: Option<String>,
    format: OutputFormat,
    handler: &OutputHandler,
) -> Result<()> {
    let status = match status {
        Some(raw) => Some(ContextStatus::parse(&raw).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown status '{}'. Expected pending, running, completed or failed",
                raw
            )
        })?),
        None => None,
    };

    let factory = open_factory(config).await?;
    let contexts: Vec<_> = factory
        .list_contexts()
        .await?
        .into_iter()
        .filter(|c| status.map_or(true, |s| c.status == s))
        .filter(|c| task_type.as_deref().map_or(true, |t| c.task_type == t))
        .collect();

    info!("Found {} contexts", contexts.len());
    emit(handler, &handler.render_contexts(format, &contexts)?)
}

/// Show one context
pub async fn show_context(
    config: &Config,
    id: String,
    format: OutputFormat,
    handler: &OutputHandler,
) -> Result<()> {
    let factory = open_factory(config).await?;
    let storage = factory.storage();
    let id = resolve_context_id(storage.as_ref(), &id).await?;

    let context = factory.get_context(&id).await?;
    emit(handler, &handler.render_context(format, &context)?)
}

/// Destroy one context and its artifacts
pub async fn delete_context(config: &Config, id: String) -> Result<()> {
    let factory = open_factory(config).await?;
    let storage = factory.storage();
    let id = resolve_context_id(storage.as_ref(), &id).await?;

    let context = factory.get_context(&id).await?;
    factory.destroy_context(&context).await?;

    println!("✓ Deleted context {} ({})", context.id, context.task_type);
    Ok(())
}

/// Destroy every failed context
pub async fn collect_garbage(
    config: &Config,
    dry_run: bool,
    format: OutputFormat,
    handler: &OutputHandler,
) -> Result<()> {
    let factory = open_factory(config).await?;
    let removed = factory.collect_garbage(dry_run).await?;

    match format {
        OutputFormat::Text => {
            let verb = if dry_run { "Would remove" } else { "Removed" };
            let mut output = format!("{} {} failed context(s)\n", verb, removed.len());
            for context in &removed {
                output.push_str(&format!("  {} {}\n", context.id.short(), context.task_type));
            }
            emit(handler, &output)
        }
        _ => emit(handler, &handler.render_contexts(format, &removed)?),
    }
}

/// Print the context id a configuration maps to
pub fn fingerprint(
    task_type: String,
    discriminators: Vec<String>,
    informational: Vec<String>,
    format: OutputFormat,
    handler: &OutputHandler,
) -> Result<()> {
    let set = Args::parse_discriminators(&discriminators, &informational)?;
    let configuration = TaskConfiguration::new(task_type, set);
    let canonical = configuration.canonical_form()?;
    let id = configuration.context_id()?;

    let value = serde_json::json!({
        "task_type": configuration.task_type,
        "context_id": id.to_string(),
        "canonical_form": canonical.as_str(),
    });

    let rendered = match format {
        OutputFormat::Text => id.to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(&value)?,
        OutputFormat::Yaml => serde_yaml::to_string(&value)?,
    };
    emit(handler, &rendered)
}
