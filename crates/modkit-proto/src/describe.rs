//! Typed form of the `describe` result document
//!
//! Hosts read the document leniently from raw JSON; modules written in Rust
//! build it with these types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Method name of the describe exchange
pub const DESCRIBE_METHOD: &str = "describe";

/// Metadata a module reports about itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescribeResult {
    /// Short display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What the module does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Publication date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// License string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Reliability rank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    /// Configurable options keyed by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, OptionSpec>,
}

/// Declaration of one module option
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared type tag, such as `string` or `bool`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl DescribeResult {
    /// Create a description with a display name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the publication date
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Set the license
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    /// Set the rank
    pub fn with_rank(mut self, rank: impl Into<String>) -> Self {
        self.rank = Some(rank.into());
        self
    }

    /// Declare an option
    pub fn with_option(mut self, name: impl Into<String>, spec: OptionSpec) -> Self {
        self.options.insert(name.into(), spec);
        self
    }
}

impl OptionSpec {
    /// Declare an option of the given type
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Default::default()
        }
    }

    /// Set the help text
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}
