//! Filesystem tools confined to a set of allowed directories

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ToolContext, ToolHandler, ToolSecurity, json_schema};

/// Largest file `fs.read_file` will return in full
const MAX_READ_BYTES: usize = 64 * 1024;
const MAX_LIST_DEPTH: usize = 3;

/// Roots a filesystem tool may touch. Empty denies everything.
#[derive(Debug, Clone, Default)]
struct AllowedDirs(Vec<PathBuf>);

impl AllowedDirs {
    fn new(dirs: Vec<String>) -> Self {
        Self(dirs.iter().map(|d| expand_home(d)).collect())
    }

    /// Canonicalise `raw` and check it sits under one of the roots
    fn resolve(&self, raw: &str) -> Result<PathBuf> {
        if raw.contains("..") {
            bail!("Path contains '..' which is not allowed");
        }
        let expanded = expand_home(raw);
        let canonical = expanded
            .canonicalize()
            .with_context(|| format!("Path does not exist: {}", expanded.display()))?;

        let inside = self.0.iter().any(|root| {
            let root = root.canonicalize().unwrap_or_else(|_| root.clone());
            canonical.starts_with(root)
        });
        if !inside {
            bail!(
                "Access denied: '{}' is not within allowed directories",
                canonical.display()
            );
        }
        Ok(canonical)
    }
}

fn expand_home(s: &str) -> PathBuf {
    match (s.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(s),
    }
}

fn path_arg(input: &Value) -> Result<&str> {
    input
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing 'path' parameter"))
}

fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

/// Read a text file, truncated past [`MAX_READ_BYTES`]
pub struct ReadFileTool {
    roots: AllowedDirs,
}

impl ReadFileTool {
    pub fn new(allowed_dirs: Vec<String>) -> Self {
        Self {
            roots: AllowedDirs::new(allowed_dirs),
        }
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn name(&self) -> &str {
        "fs.read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from one of the configured directories."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "path": { "type": "string", "description": "File to read; ~/ is expanded" }
            }),
            vec!["path"],
        )
    }

    fn security(&self) -> ToolSecurity {
        ToolSecurity::filesystem()
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String> {
        let path = self.roots.resolve(path_arg(&input)?)?;
        debug!("Agent {} reading file: {}", ctx.agent_id, path.display());

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let end = bytes.len().min(MAX_READ_BYTES);
        let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
        if bytes.len() > MAX_READ_BYTES {
            text.push_str(&format!("\n[truncated at {} bytes]", MAX_READ_BYTES));
        }
        Ok(text)
    }
}

/// List a directory, optionally recursing and filtering file names by glob
pub struct ListDirectoryTool {
    roots: AllowedDirs,
}

impl ListDirectoryTool {
    pub fn new(allowed_dirs: Vec<String>) -> Self {
        Self {
            roots: AllowedDirs::new(allowed_dirs),
        }
    }
}

#[async_trait]
impl ToolHandler for ListDirectoryTool {
    fn name(&self) -> &str {
        "fs.list_directory"
    }

    fn description(&self) -> &str {
        "List entries of a directory inside the configured directories, with file sizes."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "path": { "type": "string", "description": "Directory to list; ~/ is expanded" },
                "recursive": {
                    "type": "boolean",
                    "description": "Descend into subdirectories (up to 3 levels)"
                },
                "pattern": {
                    "type": "string",
                    "description": "Glob applied to file names, e.g. '*.csv'"
                }
            }),
            vec!["path"],
        )
    }

    fn security(&self) -> ToolSecurity {
        ToolSecurity::filesystem()
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String> {
        let root = self.roots.resolve(path_arg(&input)?)?;
        let pattern = match input.get("pattern").and_then(Value::as_str) {
            Some(p) => Some(glob::Pattern::new(p).with_context(|| format!("Bad glob: {}", p))?),
            None => None,
        };
        let listing = Listing {
            base: &root,
            recursive: input.get("recursive").and_then(Value::as_bool).unwrap_or(false),
            pattern: pattern.as_ref(),
        };
        debug!("Agent {} listing directory: {}", ctx.agent_id, root.display());

        let mut lines = Vec::new();
        listing.walk(&root, 0, &mut lines)?;
        if lines.is_empty() {
            return Ok("Directory is empty or no files match the pattern.".to_string());
        }
        Ok(lines.join("\n"))
    }
}

struct Listing<'a> {
    base: &'a Path,
    recursive: bool,
    pattern: Option<&'a glob::Pattern>,
}

impl Listing<'_> {
    fn walk(&self, dir: &Path, depth: usize, out: &mut Vec<String>) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let shown = path.strip_prefix(self.base).unwrap_or(&path).display().to_string();
            let metadata = entry.metadata()?;

            if metadata.is_dir() {
                out.push(format!("{}/ (dir)", shown));
                if self.recursive && depth < MAX_LIST_DEPTH {
                    self.walk(&path, depth + 1, out)?;
                }
            } else if self
                .pattern
                .is_none_or(|p| p.matches(&entry.file_name().to_string_lossy()))
            {
                out.push(format!("{} ({})", shown, human_size(metadata.len())));
            }
        }
        Ok(())
    }
}
