// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

/// A single line read from a tailed file, without its line terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    content: String,
    source_file: PathBuf,
    extra: Option<serde_json::Value>,
}

impl Line {
    pub fn new(content: impl Into<String>, source_file: impl Into<PathBuf>) -> Self {
        Self {
            content: content.into(),
            source_file: source_file.into(),
            extra: None,
        }
    }

    /// Attaches opaque metadata for downstream consumers.
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Path of the file at the time the line was read.
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn extra(&self) -> Option<&serde_json::Value> {
        self.extra.as_ref()
    }

    pub fn into_content(self) -> String {
        self.content
    }
}
