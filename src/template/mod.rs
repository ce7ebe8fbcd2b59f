//! Variable substitution over deployment manifests.
//!
//! The engine expands two grammatical forms in one pass over the text:
//! `${NAME}` and `${NAME:-DEFAULT}`. Substitution is non-recursive — the
//! replacement text is never re-scanned, which keeps expansion
//! order-independent and rules out injection loops. A bare `${NAME}` whose
//! variable is undefined expands to the literal token `UNDEFINED` and is
//! recorded for the dry-run report.

use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Literal substituted for a bare reference to an undefined variable.
pub const UNDEFINED_PLACEHOLDER: &str = "UNDEFINED";

/// Template regex compiled once. Group 1 is the variable name, group 2 the
/// `:-` default (present only for the defaulted form).
static TEMPLATE_REGEX: OnceLock<Regex> = OnceLock::new();

fn template_regex() -> &'static Regex {
    TEMPLATE_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("static regex pattern is valid")
    })
}

/// Which scope layer a variable's value came from.
///
/// Order here is precedence order: earlier variants shadow later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableSource {
    /// Derived from the service registry for a dependency (e.g. `DATABASE_URL`).
    Dependency,
    /// Built-ins exported by the orchestrator (`POSTSTACK_*`, `DB_*`).
    BuiltIn,
    /// Per-environment `variables:` from the project file.
    Environment,
    /// Project-wide defaults.
    ProjectDefault,
    /// The `:-` fallback inside the template itself.
    Default,
}

impl std::fmt::Display for VariableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableSource::Dependency => write!(f, "dependency"),
            VariableSource::BuiltIn => write!(f, "built-in"),
            VariableSource::Environment => write!(f, "env-vars"),
            VariableSource::ProjectDefault => write!(f, "project-default"),
            VariableSource::Default => write!(f, "default"),
        }
    }
}

/// Layered variable map with the documented precedence:
/// dependency-derived > built-ins > per-environment > project defaults.
#[derive(Debug, Clone, Default)]
pub struct VariableStack {
    layers: Vec<(VariableSource, HashMap<String, String>)>,
}

impl VariableStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer. Layers added earlier take precedence on lookup, so the
    /// orchestrator pushes Dependency first, ProjectDefault last.
    pub fn push_layer(&mut self, source: VariableSource, vars: HashMap<String, String>) {
        self.layers.push((source, vars));
    }

    /// Resolve a name against the stack, highest-precedence layer first.
    pub fn lookup(&self, name: &str) -> Option<(&str, VariableSource)> {
        for (source, vars) in &self.layers {
            if let Some(value) = vars.get(name) {
                return Some((value.as_str(), *source));
            }
        }
        None
    }

    /// Flatten into a single map honoring precedence (for display/debugging).
    pub fn flatten(&self) -> HashMap<String, String> {
        let mut flat = HashMap::new();
        for (_, vars) in self.layers.iter().rev() {
            for (key, value) in vars {
                flat.insert(key.clone(), value.clone());
            }
        }
        flat
    }
}

impl From<HashMap<String, String>> for VariableStack {
    /// A single-layer stack; used by callers that already resolved precedence.
    fn from(vars: HashMap<String, String>) -> Self {
        let mut stack = Self::new();
        stack.push_layer(VariableSource::Environment, vars);
        stack
    }
}

/// One resolved reference in a dry-run report.
#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub name: String,
    pub value: String,
    pub source: VariableSource,
}

/// Result of [`expand_report`]: the rendered text plus an audit trail.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub rendered: String,
    /// One entry per distinct referenced variable, in order of first use.
    pub bindings: Vec<Binding>,
    /// Bare references that had no value (substituted with `UNDEFINED`).
    pub undefined: Vec<String>,
}

/// Expand all `${…}` references in `text` against the stack.
pub fn expand(text: &str, vars: &VariableStack) -> String {
    expand_report(text, vars).rendered
}

/// Expand with a full audit report (the "dry-run" operation).
pub fn expand_report(text: &str, vars: &VariableStack) -> Expansion {
    let mut bindings: Vec<Binding> = Vec::new();
    let mut undefined: Vec<String> = Vec::new();

    let rendered = template_regex().replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str());

        let resolved = match vars.lookup(name) {
            // The defaulted form treats empty as absent
            Some((value, _)) if value.is_empty() && default.is_some() => None,
            Some((value, source)) => Some((value.to_string(), source)),
            None => None,
        };

        match (resolved, default) {
            (Some((value, source)), _) => {
                record_binding(&mut bindings, name, &value, source);
                value
            }
            (None, Some(fallback)) => {
                record_binding(&mut bindings, name, fallback, VariableSource::Default);
                fallback.to_string()
            }
            (None, None) => {
                if !undefined.iter().any(|u| u == name) {
                    undefined.push(name.to_string());
                }
                UNDEFINED_PLACEHOLDER.to_string()
            }
        }
    });

    Expansion {
        rendered: rendered.into_owned(),
        bindings,
        undefined,
    }
}

/// List the variable names referenced in `text`, in order of first use.
pub fn referenced_variables(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in template_regex().captures_iter(text) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn record_binding(bindings: &mut Vec<Binding>, name: &str, value: &str, source: VariableSource) {
    if !bindings.iter().any(|b| b.name == name) {
        bindings.push(Binding {
            name: name.to_string(),
            value: value.to_string(),
            source,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(pairs: &[(&str, &str)]) -> VariableStack {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        VariableStack::from(map)
    }

    #[test]
    fn expands_simple_reference() {
        let vars = stack(&[("HOST", "localhost"), ("PORT", "5432")]);
        assert_eq!(
            expand("postgresql://${HOST}:${PORT}/app", &vars),
            "postgresql://localhost:5432/app"
        );
    }

    #[test]
    fn bare_undefined_becomes_placeholder() {
        let vars = stack(&[]);
        let result = expand_report("level=${LOG_LEVEL}", &vars);
        assert_eq!(result.rendered, "level=UNDEFINED");
        assert_eq!(result.undefined, vec!["LOG_LEVEL"]);
    }

    #[test]
    fn default_used_when_absent() {
        let vars = stack(&[]);
        let result = expand_report("ttl=${CACHE_TTL:-60}", &vars);
        assert_eq!(result.rendered, "ttl=60");
        assert!(result.undefined.is_empty());
        assert_eq!(result.bindings[0].source, VariableSource::Default);
    }

    #[test]
    fn default_used_when_empty() {
        let vars = stack(&[("CACHE_TTL", "")]);
        assert_eq!(expand("ttl=${CACHE_TTL:-60}", &vars), "ttl=60");
    }

    #[test]
    fn default_ignored_when_defined() {
        let vars = stack(&[("CACHE_TTL", "300")]);
        assert_eq!(expand("ttl=${CACHE_TTL:-60}", &vars), "ttl=300");
    }

    #[test]
    fn empty_value_substitutes_for_bare_form() {
        // Only the defaulted form treats empty as absent
        let vars = stack(&[("SUFFIX", "")]);
        assert_eq!(expand("name${SUFFIX}", &vars), "name");
    }

    #[test]
    fn non_matching_dollar_sequences_pass_through() {
        let vars = stack(&[("A", "x")]);
        assert_eq!(expand("cost $5 ${} ${1BAD} $HOME ${A}", &vars), "cost $5 ${} ${1BAD} $HOME x");
    }

    #[test]
    fn substitution_is_not_recursive() {
        // The replacement text contains a reference; it must not be expanded
        let vars = stack(&[("A", "${B}"), ("B", "resolved")]);
        assert_eq!(expand("${A}", &vars), "${B}");
    }

    #[test]
    fn precedence_dependency_over_builtin_over_env_over_default() {
        let mut vars = VariableStack::new();
        vars.push_layer(
            VariableSource::Dependency,
            HashMap::from([("X".to_string(), "dep".to_string())]),
        );
        vars.push_layer(
            VariableSource::BuiltIn,
            HashMap::from([
                ("X".to_string(), "builtin".to_string()),
                ("Y".to_string(), "builtin".to_string()),
            ]),
        );
        vars.push_layer(
            VariableSource::Environment,
            HashMap::from([
                ("X".to_string(), "env".to_string()),
                ("Y".to_string(), "env".to_string()),
                ("Z".to_string(), "env".to_string()),
            ]),
        );
        vars.push_layer(
            VariableSource::ProjectDefault,
            HashMap::from([("W".to_string(), "proj".to_string())]),
        );

        assert_eq!(vars.lookup("X"), Some(("dep", VariableSource::Dependency)));
        assert_eq!(vars.lookup("Y"), Some(("builtin", VariableSource::BuiltIn)));
        assert_eq!(vars.lookup("Z"), Some(("env", VariableSource::Environment)));
        assert_eq!(
            vars.lookup("W"),
            Some(("proj", VariableSource::ProjectDefault))
        );
    }

    #[test]
    fn report_records_source_layers() {
        let mut vars = VariableStack::new();
        vars.push_layer(
            VariableSource::BuiltIn,
            HashMap::from([(
                "POSTSTACK_DATABASE_URL".to_string(),
                "postgresql://u@h:5432/d".to_string(),
            )]),
        );
        vars.push_layer(
            VariableSource::Environment,
            HashMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]),
        );

        let report = expand_report(
            "${LOG_LEVEL} ${POSTSTACK_DATABASE_URL} ${CACHE_TTL:-60}",
            &vars,
        );

        let find = |name: &str| report.bindings.iter().find(|b| b.name == name).unwrap();
        assert_eq!(find("LOG_LEVEL").source, VariableSource::Environment);
        assert_eq!(
            find("POSTSTACK_DATABASE_URL").source,
            VariableSource::BuiltIn
        );
        assert_eq!(find("CACHE_TTL").source, VariableSource::Default);
        assert_eq!(find("CACHE_TTL").value, "60");
    }

    #[test]
    fn bindings_deduplicate_repeated_references() {
        let vars = stack(&[("A", "x")]);
        let report = expand_report("${A} ${A} ${A}", &vars);
        assert_eq!(report.bindings.len(), 1);
        assert_eq!(report.rendered, "x x x");
    }

    #[test]
    fn referenced_variables_in_order_of_first_use() {
        let names = referenced_variables("${B} ${A} ${B} ${C:-1}");
        assert_eq!(names, vec!["B", "A", "C"]);
    }
}
