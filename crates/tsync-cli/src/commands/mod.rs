//! Command handlers

pub mod bind;
pub mod config;
pub mod status;
pub mod transfer;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::warn;

use tsync_core::{Progress, ProgressEvent, TargetContext, TargetProvider};

use crate::output::{Output, OutputFormat};

/// Absolute, lexically normalized form of `path`
///
/// Existing paths are canonicalized so they compare equal to bound roots.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to determine current directory")?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    // A missing leaf may still sit below a symlinked, existing parent
    match (normalized.parent(), normalized.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => Ok(parent.join(name)),
            Err(_) => Ok(normalized),
        },
        _ => Ok(normalized),
    }
}

/// Resolve command line paths, defaulting to the current directory
pub fn resolve_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if paths.is_empty() {
        return Ok(vec![resolve_path(Path::new("."))?]);
    }
    paths.iter().map(|p| resolve_path(p)).collect()
}

/// Group resources by the bound root containing them
pub fn group_by_provider(
    context: &mut TargetContext,
    resources: Vec<PathBuf>,
) -> Result<Vec<(TargetProvider, Vec<PathBuf>)>> {
    let mut groups: BTreeMap<PathBuf, (TargetProvider, Vec<PathBuf>)> = BTreeMap::new();
    for resource in resources {
        let Some(provider) = context.provider(&resource)? else {
            bail!(
                "'{}' is not inside a bound root. Run `tsync bind <url>` first.",
                resource.display()
            );
        };
        groups
            .entry(provider.root().to_path_buf())
            .or_insert_with(|| (provider, Vec::new()))
            .1
            .push(resource);
    }
    Ok(groups.into_values().collect())
}

/// Progress token that reports per-resource work in human mode
pub fn progress_for(output: &Output) -> Progress {
    match output.format {
        OutputFormat::Human => Progress::with_sink(|event| {
            if let ProgressEvent::Subtask(name) = event {
                eprintln!("  {}", name);
            }
        }),
        OutputFormat::Json | OutputFormat::Quiet => Progress::new(),
    }
}

/// Run blocking work off the runtime, canceling it on Ctrl-C
pub async fn run_cancelable<T, F>(progress: Progress, work: F) -> Result<T>
where
    F: FnOnce(Progress) -> T + Send + 'static,
    T: Send + 'static,
{
    let watcher = progress.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, canceling");
            watcher.cancel();
        }
    });

    let result = tokio::task::spawn_blocking(move || work(progress))
        .await
        .context("Worker task failed");
    interrupt.abort();
    result
}
