//! Per-module option registry
//!
//! Options are created in one step from the `options` member of a describe
//! document and afterwards only their current value changes.

use crate::{ModuleError, Result};
use serde_json::Value;

/// Type tag used when a module does not declare one
pub const DEFAULT_OPTION_TYPE: &str = "string";

/// A named, typed, user-overridable module parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOption {
    name: String,
    kind: String,
    description: Option<String>,
    default: Option<String>,
    value: Option<String>,
}

impl ModuleOption {
    /// Create an option whose current value starts at its default
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: Option<String>,
        default: Option<String>,
    ) -> Self {
        let value = default.clone();
        Self {
            name: name.into(),
            kind: kind.into(),
            description,
            default,
            value,
        }
    }

    /// Build an option from its describe document entry
    pub fn from_spec(name: &str, spec: &Value) -> Self {
        let kind = spec
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_OPTION_TYPE);
        let description = spec
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let default = spec.get("default").and_then(render_default);

        Self::new(name, kind, description, default)
    }

    /// Option name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type tag
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Declared default value
    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Current value
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Replace the current value
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }
}

// Numbers and booleans keep their JSON text; anything else is no default.
fn render_default(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

/// Ordered set of options belonging to one module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionRegistry {
    entries: Vec<ModuleOption>,
}

impl OptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `options` member of a describe document
    ///
    /// Entries follow the document's key order. Anything other than an
    /// object yields an empty registry.
    pub fn from_document(options: Option<&Value>) -> Self {
        let entries = match options {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, spec)| ModuleOption::from_spec(name, spec))
                .collect(),
            _ => Vec::new(),
        };
        Self { entries }
    }

    /// Every option whose name starts with `pattern`
    ///
    /// An empty pattern matches nothing.
    pub fn find(&self, pattern: &str) -> Vec<&ModuleOption> {
        if pattern.is_empty() {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|opt| opt.name.starts_with(pattern))
            .collect()
    }

    /// Option with exactly this name
    pub fn get(&self, name: &str) -> Option<&ModuleOption> {
        self.entries.iter().find(|opt| opt.name == name)
    }

    /// Set the value of the option named `name`
    ///
    /// An exact name match wins. Otherwise the first option, in registry
    /// order, whose name starts with `name` is updated. Returns the name of
    /// the option that changed.
    pub fn set(&mut self, module: &str, name: &str, value: &str) -> Result<&str> {
        let index = self
            .entries
            .iter()
            .position(|opt| opt.name == name)
            .or_else(|| {
                if name.is_empty() {
                    return None;
                }
                self.entries.iter().position(|opt| opt.name.starts_with(name))
            })
            .ok_or_else(|| ModuleError::OptionNotFound {
                module: module.to_string(),
                option: name.to_string(),
            })?;

        let option = &mut self.entries[index];
        option.set_value(value);
        Ok(&option.name)
    }

    /// Iterate over options in registry order
    pub fn iter(&self) -> impl Iterator<Item = &ModuleOption> {
        self.entries.iter()
    }

    /// Number of options
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the registry has no options
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> OptionRegistry {
        let options = json!({
            "TARGET": {"type": "string", "default": "127.0.0.1", "description": "Host to query"},
            "TARGETPORT": {"type": "int", "default": 445},
            "VERBOSE": {"type": "bool", "default": false},
            "USER": {}
        });
        OptionRegistry::from_document(Some(&options))
    }

    #[test]
    fn test_option_defaulting() {
        let registry = registry();

        let target = registry.get("TARGET").unwrap();
        assert_eq!(target.kind(), "string");
        assert_eq!(target.value(), Some("127.0.0.1"));
        assert_eq!(target.default_value(), Some("127.0.0.1"));
        assert_eq!(target.description(), Some("Host to query"));

        let user = registry.get("USER").unwrap();
        assert_eq!(user.kind(), DEFAULT_OPTION_TYPE);
        assert_eq!(user.value(), None);
        assert_eq!(user.description(), None);

        assert_eq!(registry.get("TARGETPORT").unwrap().value(), Some("445"));
        assert_eq!(registry.get("VERBOSE").unwrap().value(), Some("false"));
    }

    #[test]
    fn test_find_by_prefix() {
        let registry = registry();

        let names: Vec<_> = registry.find("TARGET").iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["TARGET", "TARGETPORT"]);

        assert_eq!(registry.find("V").len(), 1);
        assert!(registry.find("target").is_empty());
        assert!(registry.find("").is_empty());
        assert!(registry.find("NOPE").is_empty());
    }

    #[test]
    fn test_set_prefers_exact_match() {
        let mut registry = registry();

        let changed = registry.set("m", "TARGET", "10.0.0.5").unwrap();
        assert_eq!(changed, "TARGET");
        assert_eq!(registry.get("TARGET").unwrap().value(), Some("10.0.0.5"));
        assert_eq!(registry.get("TARGETPORT").unwrap().value(), Some("445"));
    }

    #[test]
    fn test_set_falls_back_to_first_prefix_match() {
        let mut registry = registry();

        let changed = registry.set("m", "TARGETP", "8445").unwrap();
        assert_eq!(changed, "TARGETPORT");

        let changed = registry.set("m", "TAR", "host").unwrap().to_string();
        assert_eq!(changed, "TARGET");
        assert_eq!(registry.get("TARGET").unwrap().value(), Some("host"));
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut registry = registry();

        assert!(registry.set("m", "USER", "root").is_ok());
        assert!(registry.set("m", "USER", "root").is_ok());
        assert_eq!(registry.get("USER").unwrap().value(), Some("root"));
    }

    #[test]
    fn test_set_missing_option_changes_nothing() {
        let mut registry = registry();
        let before = registry.clone();

        let result = registry.set("recon/list_users", "RHOST", "x");
        assert!(matches!(
            result,
            Err(ModuleError::OptionNotFound { ref option, .. }) if option == "RHOST"
        ));
        assert!(registry.set("m", "", "x").is_err());
        assert_eq!(registry, before);
    }

    #[test]
    fn test_value_does_not_alias_default() {
        let mut registry = registry();
        registry.set("m", "TARGET", "changed").unwrap();

        let target = registry.get("TARGET").unwrap();
        assert_eq!(target.default_value(), Some("127.0.0.1"));
        assert_eq!(target.value(), Some("changed"));
    }

    #[test]
    fn test_non_object_options_yield_empty_registry() {
        assert!(OptionRegistry::from_document(None).is_empty());
        assert!(OptionRegistry::from_document(Some(&json!(["TARGET"]))).is_empty());
        assert_eq!(OptionRegistry::new().len(), 0);
    }
}
