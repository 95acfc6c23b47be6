use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

const DIRECTIVE: &str = "#include";

/// Errors from flattening a shader source tree.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error(
        "shader file not found: {}\nensure the file exists in {}{}",
        .path.display(),
        .parent.display(),
        working_dir_hint(.working_dir)
    )]
    NotFound {
        path: PathBuf,
        parent: PathBuf,
        working_dir: Option<PathBuf>,
    },
    #[error(
        "included file not found: {}\nincluded from: {} (line {line_number})\nline: {line}",
        .path.display(),
        .from.display()
    )]
    IncludeNotFound {
        path: PathBuf,
        from: PathBuf,
        line_number: usize,
        line: String,
    },
    #[error("malformed #include directive in {} (line {line_number}): {line}", .file.display())]
    MalformedInclude {
        file: PathBuf,
        line_number: usize,
        line: String,
    },
    #[error("circular include detected: {}", .path.display())]
    CircularInclude {
        path: PathBuf,
        /// Files being expanded when the cycle closed, outermost first.
        stack: Vec<PathBuf>,
    },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One file that took part in a flatten, in expansion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludedFile {
    pub path: PathBuf,
    /// 0 for the entry file, 1 for its direct includes, and so on.
    pub depth: usize,
}

/// Flattened source plus the files it was assembled from.
///
/// Only [`flatten`] builds one, so `files` always starts with the entry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlattenedShader {
    source: String,
    files: Vec<IncludedFile>,
}

impl FlattenedShader {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn into_source(self) -> String {
        self.source
    }

    /// Every file expanded, entry first, one entry per include site.
    pub fn files(&self) -> &[IncludedFile] {
        &self.files
    }

    /// Canonical path of the entry file.
    pub fn entry(&self) -> &Path {
        &self.files[0].path
    }

    /// Number of include sites expanded (the entry file is not counted).
    pub fn include_count(&self) -> usize {
        self.files.len().saturating_sub(1)
    }

    pub fn line_count(&self) -> usize {
        self.source.lines().count()
    }

    /// Distinct files the source depends on, sorted.
    pub fn dependencies(&self) -> Vec<&Path> {
        let mut deps: Vec<&Path> = self.files.iter().map(|f| f.path.as_path()).collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

/// Read a shader and inline its `#include` directives recursively.
pub fn read_shader(path: impl AsRef<Path>) -> Result<String, ShaderError> {
    flatten(path).map(FlattenedShader::into_source)
}

/// Like [`read_shader`], also reporting which files were expanded.
pub fn flatten(path: impl AsRef<Path>) -> Result<FlattenedShader, ShaderError> {
    let path = path.as_ref();
    let _span = tracing::debug_span!("flatten", path = %path.display()).entered();

    let entry = std::fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ShaderError::NotFound {
            path: path.to_path_buf(),
            parent: parent_dir(path).to_path_buf(),
            working_dir: std::env::current_dir().ok(),
        },
        _ => ShaderError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let mut expander = Expander::default();
    let source = expander.expand(&entry, 0)?;
    tracing::debug!(
        files = expander.files.len(),
        lines = source.lines().count(),
        "flattened shader"
    );
    Ok(FlattenedShader {
        source,
        files: expander.files,
    })
}

/// Recursive expansion state for one top-level call.
#[derive(Default)]
struct Expander {
    /// Canonical paths currently being expanded. Popped on return.
    active: HashSet<PathBuf>,
    stack: Vec<PathBuf>,
    files: Vec<IncludedFile>,
}

impl Expander {
    /// `path` must already be canonical.
    fn expand(&mut self, path: &Path, depth: usize) -> Result<String, ShaderError> {
        if self.active.contains(path) {
            return Err(ShaderError::CircularInclude {
                path: path.to_path_buf(),
                stack: self.stack.clone(),
            });
        }

        let src = std::fs::read_to_string(path).map_err(|e| ShaderError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.active.insert(path.to_path_buf());
        self.stack.push(path.to_path_buf());
        self.files.push(IncludedFile {
            path: path.to_path_buf(),
            depth,
        });

        let result = self.expand_lines(path, &src, depth);

        self.stack.pop();
        self.active.remove(path);
        result
    }

    fn expand_lines(&mut self, path: &Path, src: &str, depth: usize) -> Result<String, ShaderError> {
        let mut out: Vec<String> = Vec::new();
        for (index, line) in src.lines().enumerate() {
            let line_number = index + 1;
            let Some(target) = parse_directive(line) else {
                out.push(line.to_string());
                continue;
            };

            let target = target.ok_or_else(|| ShaderError::MalformedInclude {
                file: path.to_path_buf(),
                line_number,
                line: line.to_string(),
            })?;

            let joined = parent_dir(path).join(target);
            let resolved = std::fs::canonicalize(&joined).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ShaderError::IncludeNotFound {
                    path: joined.clone(),
                    from: path.to_path_buf(),
                    line_number,
                    line: line.to_string(),
                },
                _ => ShaderError::Io {
                    path: joined.clone(),
                    source: e,
                },
            })?;

            tracing::debug!(path = %resolved.display(), "including file");
            out.push(self.expand(&resolved, depth + 1)?);
        }
        Ok(out.join("\n"))
    }
}

/// Classify a line.
///
/// `None` means the line is not a directive. `Some(None)` is a directive with
/// no usable target. `Some(Some(target))` carries the relative target with
/// delimiters and leading separators removed.
fn parse_directive(line: &str) -> Option<Option<&str>> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix(DIRECTIVE)?;

    // The target starts after the first run of whitespace.
    let Some(start) = rest.find(char::is_whitespace) else {
        return Some(None);
    };
    let rest = rest[start..].trim_start();

    let raw = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next().unwrap_or_default()
    } else if let Some(angled) = rest.strip_prefix('<') {
        angled.split('>').next().unwrap_or_default()
    } else {
        rest.split_whitespace().next().unwrap_or_default()
    };

    let target = raw
        .trim_matches(|c: char| matches!(c, '"' | '<' | '>'))
        .trim_start_matches(['/', '\\']);

    if target.is_empty() {
        Some(None)
    } else {
        Some(Some(target))
    }
}

fn working_dir_hint(dir: &Option<PathBuf>) -> String {
    dir.as_ref()
        .map(|d| format!("\nworking directory: {}", d.display()))
        .unwrap_or_default()
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}
