//! Egg variable rules (`required|integer|between:1,100`) and environment
//! resolution.

use regex::Regex;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::FieldError;
use crate::types::EggVariable;

#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    Nullable,
    String,
    Integer,
    Numeric,
    Boolean,
    AlphaNum,
    AlphaDash,
    Min(f64),
    Max(f64),
    Between(f64, f64),
    In(Vec<String>),
    Regex(Regex),
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Nullable => "nullable",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::AlphaNum => "alpha_num",
            Self::AlphaDash => "alpha_dash",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Between(..) => "between",
            Self::In(_) => "in",
            Self::Regex(_) => "regex",
        }
    }
}

/// Parsed rule string of one variable.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn parse(raw: &str) -> Self {
        let mut rules = Vec::new();
        for segment in split_rules(raw) {
            let (name, arg) = match segment.split_once(':') {
                Some((n, a)) => (n.trim(), Some(a)),
                None => (segment.trim(), None),
            };
            let rule = match (name, arg) {
                ("required", _) => Some(Rule::Required),
                ("nullable", _) => Some(Rule::Nullable),
                ("string", _) => Some(Rule::String),
                ("integer", _) => Some(Rule::Integer),
                ("numeric", _) => Some(Rule::Numeric),
                ("boolean", _) => Some(Rule::Boolean),
                ("alpha_num", _) => Some(Rule::AlphaNum),
                ("alpha_dash", _) => Some(Rule::AlphaDash),
                ("min", Some(a)) => a.trim().parse().ok().map(Rule::Min),
                ("max", Some(a)) => a.trim().parse().ok().map(Rule::Max),
                ("between", Some(a)) => a.split_once(',').and_then(|(lo, hi)| {
                    Some(Rule::Between(lo.trim().parse().ok()?, hi.trim().parse().ok()?))
                }),
                ("in", Some(a)) => Some(Rule::In(
                    a.split(',').map(|s| s.trim().to_string()).collect(),
                )),
                ("regex", Some(a)) => match compile_delimited(a) {
                    Ok(re) => Some(Rule::Regex(re)),
                    Err(e) => {
                        warn!("Skipping uncompilable rule regex {}: {}", a, e);
                        None
                    }
                },
                _ => None,
            };
            rules.extend(rule);
        }
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_required(&self) -> bool {
        self.rules.iter().any(|r| matches!(r, Rule::Required))
    }

    fn is_numeric(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r, Rule::Integer | Rule::Numeric))
    }

    /// Check a value, returning the first violated rule and a message.
    pub fn check(&self, value: &str) -> Result<(), (&'static str, String)> {
        if value.is_empty() {
            // Only `required` applies to an empty value.
            return if self.is_required() {
                Err(("required", "is required".to_string()))
            } else {
                Ok(())
            };
        }

        let numeric = self.is_numeric();
        let size = || -> Option<f64> {
            if numeric {
                value.parse::<f64>().ok()
            } else {
                Some(value.chars().count() as f64)
            }
        };
        let unit = if numeric { "" } else { " characters" };

        for rule in &self.rules {
            let violation = match rule {
                Rule::Required | Rule::Nullable | Rule::String => None,
                Rule::Integer => value
                    .parse::<i64>()
                    .is_err()
                    .then(|| "must be an integer".to_string()),
                Rule::Numeric => (!value.parse::<f64>().is_ok_and(f64::is_finite))
                    .then(|| "must be a number".to_string()),
                Rule::Boolean => (!matches!(value, "true" | "false" | "1" | "0"))
                    .then(|| "must be true, false, 1 or 0".to_string()),
                Rule::AlphaNum => (!value.chars().all(char::is_alphanumeric))
                    .then(|| "may only contain letters and numbers".to_string()),
                Rule::AlphaDash => (!value
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '-' || c == '_'))
                .then(|| "may only contain letters, numbers, dashes and underscores".to_string()),
                Rule::Min(min) => match size() {
                    Some(s) if s >= *min => None,
                    _ => Some(format!("must be at least {min}{unit}")),
                },
                Rule::Max(max) => match size() {
                    Some(s) if s <= *max => None,
                    _ => Some(format!("may not be greater than {max}{unit}")),
                },
                Rule::Between(lo, hi) => match size() {
                    Some(s) if s >= *lo && s <= *hi => None,
                    _ => Some(format!("must be between {lo} and {hi}{unit}")),
                },
                Rule::In(options) => (!options.iter().any(|o| o == value))
                    .then(|| format!("must be one of {}", options.join(", "))),
                Rule::Regex(re) => (!re.is_match(value)).then(|| "has an invalid format".to_string()),
            };
            if let Some(message) = violation {
                return Err((rule.name(), message));
            }
        }
        Ok(())
    }
}

/// Split on `|`, keeping pipes that sit inside a `regex:/.../` pattern.
fn split_rules(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut open_regex = false;
    for part in raw.split('|') {
        if open_regex {
            if let Some(last) = out.last_mut() {
                last.push('|');
                last.push_str(part);
                open_regex = !regex_closed(last);
            }
            continue;
        }
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed.to_string());
        if let Some(pattern) = trimmed.strip_prefix("regex:") {
            open_regex = !regex_closed(&format!("regex:{pattern}"));
        }
    }
    out
}

fn regex_closed(segment: &str) -> bool {
    let pattern = segment.trim_start_matches("regex:");
    let Some(body) = pattern.strip_prefix('/') else {
        return true;
    };
    match body.rfind('/') {
        Some(end) => body[end + 1..].chars().all(|c| c.is_ascii_alphabetic()),
        None => false,
    }
}

/// Compile `/pattern/flags` into a Rust regex.
fn compile_delimited(arg: &str) -> Result<Regex, regex::Error> {
    let arg = arg.trim();
    let (pattern, flags) = match arg.strip_prefix('/').and_then(|b| b.rfind('/').map(|i| (b, i))) {
        Some((body, end)) => (&body[..end], &body[end + 1..]),
        None => (arg, ""),
    };
    let inline: String = flags
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    if inline.is_empty() {
        Regex::new(pattern)
    } else {
        Regex::new(&format!("(?{inline}){pattern}"))
    }
}

/// Merge overrides over egg defaults and validate every variable.
///
/// Collects every problem instead of stopping at the first. Override keys the
/// egg does not declare, or declares as not user editable, are reported too.
pub fn resolve_environment(
    variables: &[EggVariable],
    overrides: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, Vec<FieldError>> {
    let mut env = BTreeMap::new();
    let mut errors = Vec::new();

    for var in variables {
        if !var.user_editable && overrides.contains_key(&var.env_variable) {
            errors.push(FieldError {
                field: Some(var.env_variable.clone()),
                rule: Some("editable".to_string()),
                detail: format!("{} ({}) is not user editable", var.name, var.env_variable),
            });
        }
        let value = overrides
            .get(&var.env_variable)
            .cloned()
            .unwrap_or_else(|| var.default_value.clone());
        if let Err((rule, message)) = RuleSet::parse(&var.rules).check(&value) {
            errors.push(FieldError {
                field: Some(var.env_variable.clone()),
                rule: Some(rule.to_string()),
                detail: format!("{} ({}) {}", var.name, var.env_variable, message),
            });
        }
        env.insert(var.env_variable.clone(), value);
    }

    for key in overrides.keys() {
        if !variables.iter().any(|v| &v.env_variable == key) {
            errors.push(FieldError {
                field: Some(key.clone()),
                rule: None,
                detail: format!("{key} is not a variable of this egg"),
            });
        }
    }

    if errors.is_empty() {
        Ok(env)
    } else {
        Err(errors)
    }
}
