//! Status command handler

use std::path::PathBuf;

use anyhow::Result;

use tsync_core::{
    Depth, Granularity, Progress, SyncKind, TargetContext, TargetResult, TargetSyncElement,
};

use super::{group_by_provider, resolve_paths, run_cancelable};
use crate::output::Output;

/// Classify `element` and its members down to `depth`
pub fn collect_changes(
    element: &TargetSyncElement,
    depth: Depth,
    granularity: Granularity,
    progress: &Progress,
    out: &mut Vec<(PathBuf, SyncKind)>,
) -> TargetResult<()> {
    let kind = element.sync_kind(granularity, progress)?;
    out.push((element.state().local().to_path_buf(), kind));

    if depth.includes_members() {
        for member in element.members()? {
            collect_changes(&member, depth.shallower(), granularity, progress, out)?;
        }
    }
    Ok(())
}

/// Show how local resources relate to the target
pub async fn show(
    context: &mut TargetContext,
    paths: Vec<PathBuf>,
    depth: Option<Depth>,
    contents: bool,
    output: &Output,
) -> Result<()> {
    let depth = depth.unwrap_or(context.config().default_depth);
    let granularity = if contents || context.config().compare_contents {
        Granularity::Contents
    } else {
        Granularity::Timestamp
    };
    let groups = group_by_provider(context, resolve_paths(&paths)?)?;

    let changes = run_cancelable(Progress::new(), move |progress| {
        let mut changes = Vec::new();
        for (provider, resources) in &groups {
            for resource in resources {
                let element = provider.sync_element(resource)?;
                collect_changes(&element, depth, granularity, &progress, &mut changes)?;
            }
        }
        Ok::<_, tsync_core::TargetError>(changes)
    })
    .await??;

    output.print_changes(&changes);
    Ok(())
}
