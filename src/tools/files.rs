//! Local file tools: `read_file` and `scan_path`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use super::ToolContext;
use crate::discovery::{Registrar, ToolModule};
use crate::error::ToolError;
use crate::registry::{Arguments, ContentItem, InputSchema, ResourceContents, ToolHandler};

/// The `files` tool module.
pub struct FilesModule;

impl ToolModule for FilesModule {
    fn name(&self) -> &'static str {
        "files"
    }

    fn register(&self, ctx: &ToolContext, registrar: &mut Registrar<'_>) {
        registrar.register(Arc::new(ReadFileTool {
            max_chars: ctx.config.files.max_chars,
        }));
        registrar.register(Arc::new(ScanPathTool));
    }
}

/// Reads a text file, guessing its encoding.
pub struct ReadFileTool {
    max_chars: usize,
}

impl ReadFileTool {
    /// Creates the tool with a truncation limit in characters.
    #[must_use]
    pub const fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a local text file, detecting its encoding"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .required("file_path", "string", "Path of the file to read")
            .optional(
                "embed",
                "boolean",
                "Return the file as an embedded resource instead of plain text",
            )
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let file_path = arguments.require_str("file_path")?;
        let embed = arguments.optional_bool("embed")?.unwrap_or(false);
        let path = Path::new(file_path);

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::Failed(format!("File '{file_path}' does not exist")));
            }
            Err(e) => return Err(ToolError::io(format!("Cannot access '{file_path}'"), e)),
        };
        if !metadata.is_file() {
            return Err(ToolError::Failed(format!("'{file_path}' is not a file")));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ToolError::io(format!("Cannot read '{file_path}'"), e))?;
        if bytes.is_empty() {
            return Err(ToolError::Failed(format!("File '{file_path}' is empty")));
        }

        let (text, encoding) = decode_text(&bytes);
        tracing::debug!(path = %file_path, encoding, bytes = bytes.len(), "Read file");
        let text = truncate_chars(&text, self.max_chars, bytes.len());

        if embed {
            let absolute = tokio::fs::canonicalize(path)
                .await
                .unwrap_or_else(|_| path.to_path_buf());
            return Ok(vec![ContentItem::EmbeddedResource {
                resource: ResourceContents {
                    uri: file_uri(&absolute),
                    mime_type: Some("text/plain".to_string()),
                    text: Some(text),
                },
            }]);
        }

        Ok(vec![ContentItem::text(text)])
    }
}

/// Decodes bytes as UTF-8, then GB18030, then Windows-1252.
///
/// Returns the text and the name of the encoding that was used.
#[must_use]
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.trim_start_matches('\u{feff}').to_string(), "UTF-8");
    }
    if let Some(text) = encoding_rs::GB18030.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text.into_owned(), encoding_rs::GB18030.name());
    }
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    (text.into_owned(), encoding_rs::WINDOWS_1252.name())
}

/// Keeps the first `max_chars` characters, noting the full size when the
/// file is larger than the limit.
fn truncate_chars(text: &str, max_chars: usize, byte_len: usize) -> String {
    if byte_len <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    let _ = write!(
        truncated,
        "\n... (content truncated, full file size: {byte_len} bytes)"
    );
    truncated
}

fn file_uri(path: &Path) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

/// Lists files under a directory.
pub struct ScanPathTool;

#[async_trait]
impl ToolHandler for ScanPathTool {
    fn name(&self) -> &'static str {
        "scan_path"
    }

    fn description(&self) -> &'static str {
        "List files under a directory, optionally filtered by extension"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .optional("path", "string", "Directory to scan (default: current directory)")
            .optional_array(
                "file_types",
                "string",
                "Extensions to include, e.g. ['txt', 'rs']",
            )
            .optional("recursive", "boolean", "Descend into subdirectories (default: true)")
            .optional("max_depth", "integer", "Maximum recursion depth (default: 1)")
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let options = ScanOptions {
            root: PathBuf::from(arguments.optional_str("path")?.unwrap_or(".")),
            file_types: arguments.optional_str_list("file_types")?.map(|types| {
                types
                    .iter()
                    .map(|t| t.trim_start_matches('.').to_lowercase())
                    .collect()
            }),
            recursive: arguments.optional_bool("recursive")?.unwrap_or(true),
            max_depth: arguments.optional_u64("max_depth")?.unwrap_or(1),
        };

        let report = tokio::task::spawn_blocking(move || options.run())
            .await
            .map_err(|e| ToolError::Failed(format!("scan task failed: {e}")))??;
        Ok(vec![ContentItem::text(report)])
    }
}

struct ScanOptions {
    root: PathBuf,
    file_types: Option<Vec<String>>,
    recursive: bool,
    max_depth: u64,
}

impl ScanOptions {
    fn run(&self) -> Result<String, ToolError> {
        let shown = self.root.display();
        if !self.root.exists() {
            return Err(ToolError::Failed(format!("Path '{shown}' does not exist")));
        }
        if !self.root.is_dir() {
            return Err(ToolError::Failed(format!("'{shown}' is not a directory")));
        }

        let mut lines = Vec::new();
        self.scan(&self.root, 0, &mut lines)
            .map_err(|e| ToolError::io(format!("Cannot list '{shown}'"), e))?;

        let types = self.file_types.as_ref().map(|t| t.join(", "));
        if lines.is_empty() {
            return Ok(match types {
                Some(types) => format!("No files of type {types} found in '{shown}'."),
                None => format!("No files found in '{shown}'."),
            });
        }

        let mut out = format!("Files found in '{shown}':\n\n{}", lines.join("\n"));
        let _ = write!(out, "\n\nTotal: {} entries", lines.len());
        if let Some(types) = types {
            let _ = write!(out, " (file types: {types})");
        }
        if self.recursive {
            let _ = write!(out, " (max depth: {})", self.max_depth);
        }
        Ok(out)
    }

    fn scan(&self, dir: &Path, depth: u64, lines: &mut Vec<String>) -> std::io::Result<()> {
        if depth > self.max_depth {
            return Ok(());
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(std::fs::DirEntry::file_name);

        for entry in entries {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    lines.push(format!("Error: cannot access {}: {e}", path.display()));
                    continue;
                }
            };

            if self.matches(&path) {
                lines.push(format!(
                    "{} ({}, modified: {})",
                    path.display(),
                    human_size(metadata.len()),
                    metadata
                        .modified()
                        .map_or_else(|_| "unknown".to_string(), format_time)
                ));
            }

            if self.recursive && metadata.is_dir() {
                if let Err(e) = self.scan(&path, depth + 1, lines) {
                    lines.push(format!("Error: cannot access {}: {e}", path.display()));
                }
            }
        }
        Ok(())
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(types) = &self.file_types else {
            return true;
        };
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        types.iter().any(|t| *t == ext)
    }
}

/// Formats a byte count as B, KB or MB.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
