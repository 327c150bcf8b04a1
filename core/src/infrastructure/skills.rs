// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Skill documents loaded from a per-agent directory.
//!
//! Skills are plain markdown files whose contents are prepended to the
//! agent's prompts as role context. The library is opaque to the rest of
//! the runtime; a missing directory just yields an empty library.

use std::path::Path;

use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SkillDoc {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct SkillLibrary {
    docs: Vec<SkillDoc>,
}

impl SkillLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads every `.md` file directly under `dir`, sorted by file name so
    /// the prompt context is stable across runs.
    pub async fn load_directory(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skill directory unreadable, continuing without skills");
                return Self::empty();
            }
        };

        let mut docs = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let name = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("skill")
                        .to_string();
                    docs.push(SkillDoc { name, content });
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read skill file"),
            }
        }
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(dir = %dir.display(), count = docs.len(), "skill library loaded");
        Self { docs }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Concatenated context block for prompt assembly, or `None` when the
    /// library is empty.
    pub fn context(&self) -> Option<String> {
        if self.docs.is_empty() {
            return None;
        }
        let mut out = String::from("Reference material for your role:\n");
        for doc in &self.docs {
            out.push_str("\n## ");
            out.push_str(&doc.name);
            out.push('\n');
            out.push_str(doc.content.trim());
            out.push('\n');
        }
        Some(out)
    }
}
