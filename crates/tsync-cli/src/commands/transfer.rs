//! Get, put and delete command handlers

use std::path::PathBuf;

use anyhow::Result;

use tsync_core::{BatchError, Depth, ReconcileStats, Status, TargetContext};

use super::{group_by_provider, progress_for, resolve_paths, run_cancelable};
use crate::output::Output;

/// Report failed statuses and turn them into the command's error
fn finish(statuses: Vec<Status>, output: &Output) -> Result<()> {
    if statuses.iter().all(Status::is_ok) {
        return Ok(());
    }
    output.print_statuses(&statuses);
    Err(BatchError::new(statuses).into())
}

/// Make local trees match the target
pub async fn get(
    context: &mut TargetContext,
    paths: Vec<PathBuf>,
    depth: Option<Depth>,
    output: &Output,
) -> Result<()> {
    let depth = depth.unwrap_or(context.config().default_depth);
    let groups = group_by_provider(context, resolve_paths(&paths)?)?;

    let (stats, statuses) = run_cancelable(progress_for(output), move |progress| {
        let mut stats = ReconcileStats::default();
        let mut statuses = Vec::new();
        for (provider, resources) in &groups {
            match provider.get(resources, depth, &progress) {
                Ok(group_stats) => {
                    stats.merge(group_stats);
                    statuses.extend(resources.iter().map(Status::ok));
                }
                Err(e) => statuses.extend(e.into_statuses()),
            }
        }
        (stats, statuses)
    })
    .await?;

    // Stats of the trees that did reconcile
    output.print_stats(&stats);
    finish(statuses, output)
}

/// Upload local trees to the target
pub async fn put(
    context: &mut TargetContext,
    paths: Vec<PathBuf>,
    depth: Option<Depth>,
    output: &Output,
) -> Result<()> {
    let depth = depth.unwrap_or(context.config().default_depth);
    let groups = group_by_provider(context, resolve_paths(&paths)?)?;

    let statuses = run_cancelable(progress_for(output), move |progress| {
        groups
            .iter()
            .flat_map(|(provider, resources)| {
                match provider.put(resources, depth, &progress) {
                    Ok(statuses) => statuses,
                    Err(e) => e.into_statuses(),
                }
            })
            .collect::<Vec<_>>()
    })
    .await?;

    report(statuses, "Put", output)
}

/// Delete the target counterparts of local resources
pub async fn delete(
    context: &mut TargetContext,
    paths: Vec<PathBuf>,
    depth: Option<Depth>,
    output: &Output,
) -> Result<()> {
    let depth = depth.unwrap_or(context.config().default_depth);
    let groups = group_by_provider(context, resolve_paths(&paths)?)?;

    let statuses = run_cancelable(progress_for(output), move |progress| {
        groups
            .iter()
            .flat_map(
                |(provider, resources)| match provider.delete(resources, depth, &progress) {
                    Ok(statuses) => statuses,
                    Err(e) => e.into_statuses(),
                },
            )
            .collect::<Vec<_>>()
    })
    .await?;

    report(statuses, "Deleted", output)
}

fn report(statuses: Vec<Status>, verb: &str, output: &Output) -> Result<()> {
    if output.is_json() && statuses.iter().all(Status::is_ok) {
        output.print_statuses(&statuses);
        return Ok(());
    }
    let count = statuses.len();
    finish(statuses, output)?;
    output.success(&format!("{} {} resource(s)", verb, count));
    Ok(())
}
