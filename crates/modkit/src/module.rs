//! Module records and their metadata

use crate::log::LogSink;
use crate::options::{ModuleOption, OptionRegistry};
use crate::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Metadata reported by a module's describe reply
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleMetadata {
    /// Short display name
    pub name: Option<String>,
    /// Human description
    pub description: Option<String>,
    /// Publish date
    pub date: Option<String>,
    /// License string, defaulted when absent
    pub license: String,
    /// Rank string, defaulted when absent
    pub rank: String,
    /// The complete describe result
    pub document: Value,
}

impl ModuleMetadata {
    /// Extract metadata from a describe result, applying defaults
    pub fn from_document(document: Value, default_license: &str, default_rank: &str) -> Self {
        let field = |key: &str| document.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            name: field("name"),
            description: field("description"),
            date: field("date"),
            license: field("license").unwrap_or_else(|| default_license.to_string()),
            rank: field("rank").unwrap_or_else(|| default_rank.to_string()),
            document,
        }
    }
}

/// One discovered module executable
#[derive(Debug, Clone)]
pub struct Module {
    path: PathBuf,
    fullname: String,
    metadata: Option<ModuleMetadata>,
    options: OptionRegistry,
}

impl Module {
    /// Create an undescribed record
    pub fn new(path: impl Into<PathBuf>, fullname: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fullname: fullname.into(),
            metadata: None,
            options: OptionRegistry::new(),
        }
    }

    /// Fully-qualified module name
    pub fn name(&self) -> &str {
        &self.fullname
    }

    /// Path of the executable
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata, once described
    pub fn metadata(&self) -> Option<&ModuleMetadata> {
        self.metadata.as_ref()
    }

    /// Check whether a describe exchange has completed
    pub fn is_described(&self) -> bool {
        self.metadata.is_some()
    }

    /// Option registry
    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    /// Options whose names start with `pattern`
    pub fn find_options(&self, pattern: &str) -> Vec<&ModuleOption> {
        self.options.find(pattern)
    }

    /// Set an option value, returning the name of the option changed
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<&str> {
        self.options.set(&self.fullname, name, value)
    }

    /// Populate metadata and options from a describe result
    ///
    /// Metadata and options are replaced together. Returns `false` and
    /// leaves the record untouched when it is already described.
    pub fn populate(&mut self, document: Value, default_license: &str, default_rank: &str) -> bool {
        if self.metadata.is_some() {
            return false;
        }

        let options = OptionRegistry::from_document(document.get("options"));
        self.metadata = Some(ModuleMetadata::from_document(document, default_license, default_rank));
        self.options = options;
        true
    }

    /// Print the record for interactive inspection
    ///
    /// Fields that are not known yet print empty.
    pub fn log_metadata(&self, sink: &dyn LogSink) {
        let (name, license, rank, date, description) = match &self.metadata {
            Some(m) => (
                m.name.as_deref().unwrap_or(""),
                m.license.as_str(),
                m.rank.as_str(),
                m.date.as_deref().unwrap_or(""),
                m.description.as_deref().unwrap_or(""),
            ),
            None => ("", "", "", "", ""),
        };

        sink.line("");
        sink.line(&format!("       Name: {}", name));
        sink.line(&format!("     Module: {}", self.fullname));
        sink.line(&format!("    License: {}", license));
        sink.line(&format!("       Rank: {}", rank));
        sink.line(&format!("       Date: {}", date));
        sink.line("");
        sink.line("Basic options:");
        for option in self.options.iter() {
            sink.line(&format!("  {} = {}", option.name(), option.value().unwrap_or("")));
        }
        sink.line("");
        sink.line(&format!("Description: {}", description));
    }
}
