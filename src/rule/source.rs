//! Rule definitions loaded from TOML files.
//!
//! A rule file holds `[[rule]]` tables with the DSL text inline:
//!
//! ```toml
//! [[rule]]
//! id = 1
//! name = "Grandparent Inference"
//! priority = 10
//! when = """
//! ?a -[PARENT_OF]-> ?b
//! ?b -[PARENT_OF]-> ?c
//! """
//! then = "DERIVE ?a -[GRANDPARENT_OF]-> ?c"
//! ```
//!
//! Loading only produces [`InferenceRule`] values; compilation against the
//! store schema happens separately so one file can serve stores with
//! different schemas.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{InferenceRule, RuleId};
use crate::fact::Scope;

#[derive(Debug, Error, Diagnostic)]
pub enum RuleSourceError {
    #[error("failed to read rule file {path}")]
    #[diagnostic(code(seshat::rule_source::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule file")]
    #[diagnostic(
        code(seshat::rule_source::toml),
        help("Rule files hold [[rule]] tables with id, name, when, and then keys.")
    )]
    Toml {
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid rule definition \"{name}\": {message}")]
    #[diagnostic(code(seshat::rule_source::invalid))]
    Invalid { name: String, message: String },
}

#[derive(Debug, Deserialize, Serialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleDef>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RuleDef {
    id: u64,
    name: String,
    when: String,
    then: String,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_enabled")]
    enabled: bool,
    /// `"global"`, `"workspace:<name>"`, or `"project:<name>"`.
    #[serde(default)]
    scope: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Parse rule definitions from TOML text.
pub fn rules_from_str(text: &str) -> Result<Vec<InferenceRule>, RuleSourceError> {
    let file: RuleFile =
        toml::from_str(text).map_err(|source| RuleSourceError::Toml { source })?;
    file.rules.into_iter().map(rule_from_def).collect()
}

/// Load rule definitions from a TOML file on disk.
pub fn rules_from_path(path: &Path) -> Result<Vec<InferenceRule>, RuleSourceError> {
    let text = std::fs::read_to_string(path).map_err(|source| RuleSourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    rules_from_str(&text)
}

fn rule_from_def(def: RuleDef) -> Result<InferenceRule, RuleSourceError> {
    let id = RuleId::new(def.id).ok_or_else(|| RuleSourceError::Invalid {
        name: def.name.clone(),
        message: "rule id must be nonzero".into(),
    })?;
    let scope = match def.scope.as_deref() {
        None | Some("global") => Scope::Global,
        Some(tagged) => match tagged.split_once(':') {
            Some(("workspace", name)) if !name.is_empty() => Scope::Workspace(name.to_string()),
            Some(("project", name)) if !name.is_empty() => Scope::Project(name.to_string()),
            _ => {
                return Err(RuleSourceError::Invalid {
                    name: def.name,
                    message: format!(
                        "scope \"{tagged}\" is not \"global\", \"workspace:<name>\", or \"project:<name>\""
                    ),
                });
            }
        },
    };
    let mut rule = InferenceRule::new(id, def.name, def.when, def.then)
        .with_priority(def.priority)
        .with_scope(scope);
    rule.enabled = def.enabled;
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_rules_with_defaults() {
        let rules = rules_from_str(
            r#"
            [[rule]]
            id = 1
            name = "Grandparent Inference"
            when = "?a -[PARENT_OF]-> ?b\n?b -[PARENT_OF]-> ?c"
            then = "DERIVE ?a -[GRANDPARENT_OF]-> ?c"

            [[rule]]
            id = 2
            name = "Scoped"
            priority = 5
            enabled = false
            scope = "workspace:research"
            when = "?a -[R]-> ?b"
            then = "?a -[S]-> ?b"
            "#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].priority, 0);
        assert!(rules[0].enabled);
        assert_eq!(rules[0].scope, Scope::Global);

        assert_eq!(rules[1].priority, 5);
        assert!(!rules[1].enabled);
        assert_eq!(rules[1].scope, Scope::Workspace("research".into()));
    }

    #[test]
    fn zero_id_is_rejected() {
        let err = rules_from_str(
            r#"
            [[rule]]
            id = 0
            name = "bad"
            when = "?a -[R]-> ?b"
            then = "?a -[S]-> ?b"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, RuleSourceError::Invalid { .. }));
    }

    #[test]
    fn malformed_scope_is_rejected() {
        let err = rules_from_str(
            r#"
            [[rule]]
            id = 3
            name = "bad scope"
            scope = "universe:all"
            when = "?a -[R]-> ?b"
            then = "?a -[S]-> ?b"
            "#,
        )
        .unwrap_err();
        assert!(format!("{err}").contains("universe:all"));
    }

    #[test]
    fn empty_file_yields_no_rules() {
        assert!(rules_from_str("").unwrap().is_empty());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
            [[rule]]
            id = 7
            name = "from disk"
            when = "?a -[R]-> ?b"
            then = "?a -[S]-> ?b"
            "#,
        )
        .unwrap();

        let rules = rules_from_path(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "from disk");

        let err = rules_from_path(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, RuleSourceError::Io { .. }));
    }
}
