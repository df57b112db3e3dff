// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Content types and file-extension bindings.
//!
//! A document is routed to a server by its content type, and the content
//! type is found from the file extension.

use std::collections::HashMap;
use std::path::Path;

/// A named content type, optionally derived from a base type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Content type name, e.g. `sneklang`.
    pub name: String,
    /// Base content type this one derives from.
    pub base: Option<String>,
}

/// Registry of content types and the extensions bound to them.
#[derive(Debug, Default, Clone)]
pub struct ContentTypeRegistry {
    types: HashMap<String, ContentType>,
    extensions: HashMap<String, String>,
}

impl ContentTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or redefines) a content type.
    pub fn define(&mut self, name: &str, base: Option<&str>) {
        self.types.insert(
            name.to_string(),
            ContentType {
                name: name.to_string(),
                base: base.map(str::to_string),
            },
        );
    }

    /// Binds a file extension to a content type. `".src"` and `"src"` are
    /// equivalent, and matching ignores case.
    pub fn bind_extension(&mut self, extension: &str, content_type: &str) {
        self.extensions
            .insert(normalize_extension(extension), content_type.to_string());
    }

    /// Looks up a content type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ContentType> {
        self.types.get(name)
    }

    /// Finds the content type for a file by its extension.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> Option<&ContentType> {
        let ext = path.extension()?.to_str()?;
        let name = self.extensions.get(&normalize_extension(ext))?;
        self.types.get(name)
    }

    /// True if `name` is `base` or derives from it, directly or not.
    #[must_use]
    pub fn derives_from(&self, name: &str, base: &str) -> bool {
        let mut current = Some(name);
        // Bounded walk so a cyclic definition cannot loop forever.
        for _ in 0..=self.types.len() {
            let Some(candidate) = current else {
                return false;
            };
            if candidate == base {
                return true;
            }
            current = self
                .types
                .get(candidate)
                .and_then(|ct| ct.base.as_deref());
        }
        false
    }

    /// Names of all defined content types, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}
