//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::path::{Path, PathBuf};

use tsync_core::{LocationMapping, ReconcileStats, Severity, Status, SyncKind};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a binding
    pub fn print_binding(&self, mapping: &LocationMapping) {
        match self.format {
            OutputFormat::Human => {
                println!("Root: {}", mapping.path().display());
                println!("Type: {}", mapping.kind());
                println!("URL:  {}", mapping.url());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!(mapping));
            }
            OutputFormat::Quiet => {
                println!("{}", mapping.path().display());
            }
        }
    }

    /// Print the outcome of a batch operation, failures included
    pub fn print_statuses(&self, statuses: &[Status]) {
        match self.format {
            OutputFormat::Human => {
                for status in statuses {
                    print_status_tree(status, 0);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "statuses": statuses }));
            }
            OutputFormat::Quiet => {
                for status in statuses {
                    for failure in status.failures() {
                        println!("{}", failure.resource.display());
                    }
                }
            }
        }
    }

    /// Print what a get did
    pub fn print_stats(&self, stats: &ReconcileStats) {
        match self.format {
            OutputFormat::Human => {
                if stats.is_empty() {
                    println!("Nothing to do.");
                    return;
                }
                println!(
                    "{} downloaded, {} unchanged, {} created, {} deleted",
                    stats.downloaded, stats.unchanged, stats.created, stats.deleted
                );
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "status": "success", "stats": stats }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print the sync kind of each resource
    pub fn print_changes(&self, changes: &[(PathBuf, SyncKind)]) {
        match self.format {
            OutputFormat::Human => {
                let pending: Vec<_> = changes.iter().filter(|(_, k)| !k.is_in_sync()).collect();
                if pending.is_empty() {
                    println!("Everything in sync.");
                    return;
                }
                for (path, kind) in &pending {
                    println!("{}", change_line(path, *kind));
                }
                println!("\n{} resource(s) out of sync", pending.len());
            }
            OutputFormat::Json => {
                let entries: Vec<_> = changes
                    .iter()
                    .map(|(path, kind)| serde_json::json!({ "resource": path, "kind": kind }))
                    .collect();
                println!("{}", serde_json::json!({ "resources": entries }));
            }
            OutputFormat::Quiet => {
                for (path, kind) in changes {
                    if !kind.is_in_sync() {
                        println!("{}", path.display());
                    }
                }
            }
        }
    }

    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_status_tree(status: &Status, indent: usize) {
    println!("{}{}", "  ".repeat(indent), status_line(status));
    for child in &status.children {
        print_status_tree(child, indent + 1);
    }
}

fn status_line(status: &Status) -> String {
    match status.severity {
        Severity::Ok => format!("ok      {}", status.resource.display()),
        Severity::Error => format!("FAILED  {}: {}", status.resource.display(), status.message),
    }
}

fn change_line(path: &Path, kind: SyncKind) -> String {
    format!("{:<32} {}", kind.to_string(), path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsync_core::TargetError;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(&Status::ok("/w/a")), "ok      /w/a");

        let failed = Status::error("/w/b", &TargetError::Canceled);
        assert_eq!(status_line(&failed), "FAILED  /w/b: Operation canceled");
    }

    #[test]
    fn test_change_line() {
        let line = change_line(Path::new("/w/a"), SyncKind::OUTGOING | SyncKind::ADDITION);
        assert!(line.starts_with("outgoing addition"));
        assert!(line.ends_with(" /w/a"));
    }
}
