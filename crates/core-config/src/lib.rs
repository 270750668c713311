//! Feature specification parsing and analysis tunables.
//!
//! The specification file names the sensitive feature and the one-hot
//! encoded uncontroversial features, line by line: an arity, then that many
//! variable names, repeated for each one-hot group. The group list ends at
//! EOF or at the first line that is not an integer. Every input variable the
//! file does not claim is treated as real-valued in `[0, 1]`.
//!
//! Tunables load from an optional `fairlens.toml`; a missing file simply
//! means defaults. Unknown fields are ignored (TOML deserialization
//! tolerance) so the file can grow without breaking older binaries.

use anyhow::{Context, Result};
use core_expr::Variable;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("specification line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("specification names unknown input variable `{name}`")]
    UnknownVariable { name: String },
    #[error("specification names `{name}` more than once")]
    DuplicateVariable { name: String },
    #[error("failed to read specification")]
    Io(#[from] std::io::Error),
}

/// Parsed feature specification: the sensitive group plus the one-hot
/// encoded uncontroversial groups.
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub sensitive: Vec<Variable>,
    pub one_hot_groups: Vec<Vec<Variable>>,
}

impl FeatureSpec {
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let mut lines = text.lines().enumerate();
        let mut next_line = move || lines.next().map(|(i, l)| (i + 1, l.trim()));

        let Some((line, arity_text)) = next_line() else {
            return Err(SpecError::Malformed {
                line: 1,
                reason: "empty specification".to_string(),
            });
        };
        let arity = parse_arity(line, arity_text)?;
        let mut sensitive = Vec::with_capacity(arity);
        for _ in 0..arity {
            sensitive.push(parse_name(next_line())?);
        }

        let mut one_hot_groups = Vec::new();
        while let Some((line, text)) = next_line() {
            // A non-integer line terminates the group list.
            let Ok(arity) = text.parse::<usize>() else {
                break;
            };
            if arity == 0 {
                return Err(SpecError::Malformed {
                    line,
                    reason: "one-hot group arity must be positive".to_string(),
                });
            }
            let mut group = Vec::with_capacity(arity);
            for _ in 0..arity {
                group.push(parse_name(next_line())?);
            }
            one_hot_groups.push(group);
        }

        let spec = Self {
            sensitive,
            one_hot_groups,
        };
        spec.check_distinct()?;
        Ok(spec)
    }

    /// Every named variable must be a known input.
    pub fn validate(&self, inputs: &BTreeSet<Variable>) -> Result<(), SpecError> {
        for var in self.named() {
            if !inputs.contains(var) {
                return Err(SpecError::UnknownVariable {
                    name: var.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Input variables the specification does not claim, in name order.
    /// These are the real-valued uncontroversial features.
    pub fn real_features(&self, inputs: &BTreeSet<Variable>) -> Vec<Variable> {
        let named: BTreeSet<&Variable> = self.named().collect();
        inputs
            .iter()
            .filter(|var| !named.contains(var))
            .cloned()
            .collect()
    }

    fn named(&self) -> impl Iterator<Item = &Variable> {
        self.sensitive
            .iter()
            .chain(self.one_hot_groups.iter().flatten())
    }

    fn check_distinct(&self) -> Result<(), SpecError> {
        let mut seen = BTreeSet::new();
        for var in self.named() {
            if !seen.insert(var.clone()) {
                return Err(SpecError::DuplicateVariable {
                    name: var.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_arity(line: usize, text: &str) -> Result<usize, SpecError> {
    match text.parse::<usize>() {
        Ok(0) | Err(_) => Err(SpecError::Malformed {
            line,
            reason: format!("expected a positive arity, found `{text}`"),
        }),
        Ok(arity) => Ok(arity),
    }
}

fn parse_name(entry: Option<(usize, &str)>) -> Result<Variable, SpecError> {
    match entry {
        Some((_, name)) if !name.is_empty() => Ok(Variable::new(name)),
        Some((line, _)) => Err(SpecError::Malformed {
            line,
            reason: "expected a variable name".to_string(),
        }),
        None => Err(SpecError::Malformed {
            line: 0,
            reason: "unexpected end of file inside a group".to_string(),
        }),
    }
}

/// Analysis tunables with their defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Tunables {
    /// Maximum disjunctive activations tolerated per sensitive value.
    #[serde(default = "Tunables::default_widening")]
    pub widening: usize,
    /// Minimum width a real-feature range may be bisected down to.
    #[serde(default = "Tunables::default_difference")]
    pub difference: f64,
    /// Worker threads per pool; defaults to the logical CPU count.
    #[serde(default)]
    pub workers: Option<usize>,
}

impl Tunables {
    fn default_widening() -> usize {
        2
    }

    fn default_difference() -> f64 {
        0.25
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            widening: Self::default_widening(),
            difference: Self::default_difference(),
            workers: None,
        }
    }
}

/// Loads tunables from the given file, or from `fairlens.toml` in the
/// working directory. A missing file yields the defaults.
pub fn load_tunables(path: Option<PathBuf>) -> Result<Tunables> {
    let candidate = path.unwrap_or_else(|| PathBuf::from("fairlens.toml"));
    if !candidate.exists() {
        info!(target: "config", path = %candidate.display(), "no tunables file, using defaults");
        return Ok(Tunables::default());
    }
    let raw = fs::read_to_string(&candidate)
        .with_context(|| format!("reading {}", candidate.display()))?;
    let tunables: Tunables =
        toml::from_str(&raw).with_context(|| format!("parsing {}", candidate.display()))?;
    info!(
        target: "config",
        path = %candidate.display(),
        widening = tunables.widening,
        difference = tunables.difference,
        "tunables loaded"
    );
    Ok(tunables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn inputs(names: &[&str]) -> BTreeSet<Variable> {
        names.iter().map(|n| Variable::new(n)).collect()
    }

    #[test]
    fn parses_sensitive_and_groups() {
        let spec = FeatureSpec::parse("2\ns01\ns02\n3\na01\na02\na03\n2\nb01\nb02\n").unwrap();
        assert_eq!(spec.sensitive.len(), 2);
        assert_eq!(spec.one_hot_groups.len(), 2);
        assert_eq!(spec.one_hot_groups[0].len(), 3);
        assert_eq!(spec.one_hot_groups[1].len(), 2);
    }

    #[test]
    fn non_integer_line_terminates_groups() {
        let spec = FeatureSpec::parse("1\ns01\n2\na01\na02\n# trailing notes\n9\n").unwrap();
        assert_eq!(spec.one_hot_groups.len(), 1);
    }

    #[test]
    fn sensitive_only_specification() {
        let spec = FeatureSpec::parse("2\ns01\ns02\n").unwrap();
        assert!(spec.one_hot_groups.is_empty());
    }

    #[test]
    fn bad_arity_reports_the_line() {
        let err = FeatureSpec::parse("two\ns01\n").unwrap_err();
        match err {
            SpecError::Malformed { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn truncated_group_is_malformed() {
        let err = FeatureSpec::parse("1\ns01\n3\na01\na02\n").unwrap_err();
        assert!(matches!(err, SpecError::Malformed { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = FeatureSpec::parse("2\ns01\ns01\n").unwrap_err();
        assert!(matches!(err, SpecError::DuplicateVariable { .. }));
    }

    #[test]
    fn validation_flags_unknown_variables() {
        let spec = FeatureSpec::parse("1\ns01\n1\na01\n").unwrap();
        assert!(spec.validate(&inputs(&["s01", "a01", "x01"])).is_ok());
        let err = spec.validate(&inputs(&["s01", "x01"])).unwrap_err();
        match err {
            SpecError::UnknownVariable { name } => assert_eq!(name, "a01"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unclaimed_inputs_are_real_features() {
        let spec = FeatureSpec::parse("1\ns01\n1\na01\n").unwrap();
        let real = spec.real_features(&inputs(&["s01", "a01", "x02", "x01"]));
        assert_eq!(real, vec![Variable::new("x01"), Variable::new("x02")]);
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "1\ns01\n").unwrap();
        let spec = FeatureSpec::load(file.path()).unwrap();
        assert_eq!(spec.sensitive, vec![Variable::new("s01")]);
    }

    #[test]
    fn default_tunables_when_file_is_missing() {
        let tunables =
            load_tunables(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(tunables.widening, 2);
        assert_eq!(tunables.difference, 0.25);
        assert_eq!(tunables.workers, None);
    }

    #[test]
    fn tunables_parse_and_ignore_unknown_fields() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "widening = 3\ndifference = 0.5\nfuture = true\n").unwrap();
        let tunables = load_tunables(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(tunables.widening, 3);
        assert_eq!(tunables.difference, 0.5);
    }
}
