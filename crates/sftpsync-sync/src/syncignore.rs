//! `.syncignore` handling
//!
//! Each context directory may carry a `.syncignore` file at its root listing
//! glob patterns, one per line, for files that must never be uploaded.
//!
//! ## Pattern rules
//!
//! - Blank lines and lines starting with `#` are skipped
//! - A pattern containing `***` is rejected
//! - A bare pattern (`*.log`, `cache`) matches at any depth
//! - A leading `/` anchors the pattern to the context root (`/build`)
//! - A leading `**/` is kept as written
//! - A trailing `/` marks a directory and matches everything below it
//! - `*` never crosses a `/`; `**` does
//!
//! The `.syncignore` file itself is always ignored.

use std::io::ErrorKind;
use std::path::{Component, Path};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::SyncError;

/// Name of the ignore file at the root of a context directory
pub const SYNCIGNORE_FILE: &str = ".syncignore";

/// Compiled set of ignore patterns for one context
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<String>,
    set: GlobSet,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::empty()
    }
}

impl IgnoreRules {
    /// Rules that ignore nothing but the `.syncignore` file itself
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// Loads `<context>/.syncignore`
    ///
    /// A missing file yields empty rules. Any other read error is returned.
    pub fn load(context: &Path) -> Result<Self, SyncError> {
        let path = context.join(SYNCIGNORE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::empty()),
            Err(source) => Err(SyncError::IgnoreFile { path, source }),
        }
    }

    /// Parses the contents of a `.syncignore` file
    pub fn parse(content: &str) -> Self {
        Self::from_patterns(content.lines())
    }

    /// Builds rules from individual pattern lines
    ///
    /// Invalid patterns are logged and skipped.
    pub fn from_patterns<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.contains("***") {
                warn!(pattern = %line, "Skipping invalid ignore pattern");
                continue;
            }

            let expanded = expand_pattern(line);
            let mut compiled = Vec::with_capacity(expanded.len());
            for glob in &expanded {
                match GlobBuilder::new(glob).literal_separator(true).build() {
                    Ok(g) => compiled.push(g),
                    Err(e) => {
                        warn!(pattern = %line, error = %e, "Skipping invalid ignore pattern");
                        compiled.clear();
                        break;
                    }
                }
            }
            if compiled.is_empty() {
                continue;
            }

            for glob in compiled {
                builder.add(glob);
            }
            patterns.push(line.to_string());
        }

        let set = match builder.build() {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "Failed to build ignore set, ignoring nothing");
                return Self::empty();
            }
        };

        debug!(count = patterns.len(), "Loaded ignore patterns");
        Self { patterns, set }
    }

    /// Returns true if `relative` (a path relative to the context root)
    /// should not be uploaded
    pub fn is_ignored(&self, relative: &Path) -> bool {
        if relative.file_name().is_some_and(|n| n == SYNCIGNORE_FILE) {
            return true;
        }
        if self.set.is_empty() {
            return false;
        }
        self.set.is_match(to_slash(relative))
    }

    /// The accepted pattern lines, in file order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Expands one pattern line into the globs that implement it
fn expand_pattern(line: &str) -> Vec<String> {
    if let Some(dir) = line.strip_suffix('/') {
        if let Some(anchored) = dir.strip_prefix('/') {
            return vec![format!("{anchored}/**")];
        }
        if dir.starts_with("**/") {
            return vec![format!("{dir}/**")];
        }
        return vec![format!("{dir}/**"), format!("**/{dir}/**")];
    }

    if let Some(anchored) = line.strip_prefix('/') {
        return vec![anchored.to_string()];
    }
    if line.starts_with("**/") {
        return vec![line.to_string()];
    }
    vec![line.to_string(), format!("**/{line}")]
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
