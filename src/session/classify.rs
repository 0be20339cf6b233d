//! Streaming vs immediate execution decision.

use std::fs;

use serde::Serialize;
use tracing::debug;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionMode {
    /// Code works through data incrementally.
    Streaming,
    /// Code runs as a single pass.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: Vec<String>,
    file_threshold_bytes: u64,
}

impl Classifier {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            keywords: config.streaming_keywords.iter().map(|k| k.to_lowercase()).collect(),
            file_threshold_bytes: config.streaming_file_threshold_mb * 1024 * 1024,
        }
    }

    /// Streaming when the code mentions a streaming keyword or a quoted path
    /// to a file above the size threshold.
    pub fn classify(&self, code: &str) -> ExecutionMode {
        let lower = code.to_lowercase();
        if let Some(keyword) = self.keywords.iter().find(|k| lower.contains(k.as_str())) {
            debug!(keyword = %keyword, "Streaming keyword found");
            return ExecutionMode::Streaming;
        }

        for candidate in quoted_strings(code) {
            let Ok(meta) = fs::metadata(candidate) else {
                continue;
            };
            if meta.is_file() && meta.len() > self.file_threshold_bytes {
                debug!(path = candidate, size = meta.len(), "Large input file referenced");
                return ExecutionMode::Streaming;
            }
        }
        ExecutionMode::Immediate
    }
}

/// Contents of single- and double-quoted literals, without escapes.
fn quoted_strings(code: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut open: Option<(char, usize)> = None;
    for (i, c) in code.char_indices() {
        match open {
            None if c == '"' || c == '\'' => open = Some((c, i + 1)),
            Some((quote, start)) if c == quote => {
                if i > start {
                    out.push(&code[start..i]);
                }
                open = None;
            }
            Some(_) if c == '\n' => open = None,
            _ => {}
        }
    }
    out
}
