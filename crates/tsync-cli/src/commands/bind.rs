//! Bind command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use tsync_core::provider::{KEY_TYPE, KEY_URL};
use tsync_core::{TargetConfiguration, TargetContext};

use super::resolve_path;
use crate::output::Output;

/// Site type implied by a URL scheme
fn kind_from_url(url: &str) -> Option<&str> {
    url.split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

/// Build the provider configuration from `--type`, `-o key=value` and the URL
pub fn build_configuration(
    url: &str,
    kind: Option<&str>,
    options: &[String],
) -> Result<TargetConfiguration> {
    let mut configuration = TargetConfiguration::from_pairs(options)?;
    let kind = kind
        .or_else(|| kind_from_url(url))
        .with_context(|| format!("Cannot tell the site type of '{}'. Pass --type.", url))?;
    configuration.set(KEY_TYPE, kind)?;
    configuration.set(KEY_URL, url)?;
    Ok(configuration)
}

/// Bind a local root to a site
pub fn bind(
    context: &mut TargetContext,
    url: String,
    root: Option<PathBuf>,
    kind: Option<String>,
    options: Vec<String>,
    output: &Output,
) -> Result<()> {
    let root = root.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create root directory: {:?}", root))?;
    let root = resolve_path(&root)?;

    let configuration = build_configuration(&url, kind.as_deref(), &options)?;
    let provider = context
        .configure(&root, configuration)
        .with_context(|| format!("Failed to bind {}", root.display()))?;

    if output.is_json() || output.is_quiet() {
        output.print_binding(provider.mapping());
    } else {
        output.success(&format!("Bound {} to {}", root.display(), url));
    }
    Ok(())
}

/// Remove the binding of a root
pub fn unbind(context: &mut TargetContext, root: Option<PathBuf>, output: &Output) -> Result<()> {
    let root = resolve_path(root.as_deref().unwrap_or_else(|| Path::new(".")))?;
    match context.unconfigure(&root)? {
        Some(mapping) => output.success(&format!(
            "Unbound {} from {}",
            root.display(),
            mapping.url()
        )),
        None => anyhow::bail!("'{}' is not a bound root", root.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_url() {
        assert_eq!(kind_from_url("file:///srv/www"), Some("file"));
        assert_eq!(kind_from_url("memory://x"), Some("memory"));
        assert_eq!(kind_from_url("/srv/www"), None);
        assert_eq!(kind_from_url("://x"), None);
    }

    #[test]
    fn test_build_configuration() {
        let options = vec!["user=me".to_string(), "mode = ro=x".to_string()];
        let config = build_configuration("file:///srv", None, &options).unwrap();
        assert_eq!(config.get("type"), Some("file"));
        assert_eq!(config.get("url"), Some("file:///srv"));
        assert_eq!(config.get("user"), Some("me"));
        assert_eq!(config.get("mode"), Some(" ro=x"));

        let config = build_configuration("srv", Some("memory"), &[]).unwrap();
        assert_eq!(config.get("type"), Some("memory"));

        assert!(build_configuration("srv", None, &[]).is_err());
        assert!(build_configuration("file:///srv", None, &["novalue".to_string()]).is_err());
    }
}
