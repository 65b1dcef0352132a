//! If-part evaluation
//!
//! Sentry if-parts are boolean expressions over the variables visible from
//! the node that owns the sentry. The engine only asks for an evaluation
//! when a sentry is checked; variable writes never trigger one.

use case_types::{CaseError, CaseResult, Value};
use case_variables::VariableMap;

/// Evaluates if-part expressions against case variables
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, variables: &VariableMap) -> CaseResult<bool>;

    /// Variable names `expression` reads. `None` means every visible
    /// variable has to be supplied.
    fn referenced_variables(&self, _expression: &str) -> Option<Vec<String>> {
        None
    }
}

/// The bundled condition language.
///
/// Supports `name == literal`, `!=`, `>=`, `<=`, `>`, `<`, a bare boolean
/// variable, `!name`, the constants `true`/`false`, and chains joined by
/// `&&` / `||` (`&&` binds tighter; no parentheses). Literals are numbers,
/// quoted or bare strings, `true`, `false` and `null`.
#[derive(Clone, Debug, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn evaluate_atom(&self, atom: &str, variables: &VariableMap) -> CaseResult<bool> {
        let atom = atom.trim();
        if atom.is_empty() {
            return Err(CaseError::Expression("empty condition".into()));
        }
        match atom {
            "true" => return Ok(true),
            "false" => return Ok(false),
            _ => {}
        }

        // Two-character operators first so ">=" is not read as ">"
        for op in ["==", "!=", ">=", "<=", ">", "<"] {
            if let Some((key, literal)) = atom.split_once(op) {
                return self.compare(atom, key.trim(), op, literal.trim(), variables);
            }
        }

        if let Some(name) = atom.strip_prefix('!') {
            return self.boolean_variable(name.trim(), variables).map(|b| !b);
        }
        self.boolean_variable(atom, variables)
    }

    fn boolean_variable(&self, name: &str, variables: &VariableMap) -> CaseResult<bool> {
        match variables.get(name).map(|v| &v.value) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Boolean(b)) => Ok(*b),
            Some(other) => Err(CaseError::Expression(format!(
                "variable '{}' is a {}, not a boolean",
                name,
                other.variable_type()
            ))),
        }
    }

    fn compare(
        &self,
        expression: &str,
        key: &str,
        op: &str,
        literal: &str,
        variables: &VariableMap,
    ) -> CaseResult<bool> {
        if key.is_empty() || literal.is_empty() {
            return Err(CaseError::Expression(format!(
                "malformed condition '{}'",
                expression
            )));
        }
        let literal = Literal::parse(literal);
        let actual = match variables.get(key) {
            Some(v) => &v.value,
            // Missing variable: inequality holds, everything else fails
            None => return Ok(op == "!="),
        };

        match op {
            "==" => Ok(literal.equals(actual)),
            "!=" => Ok(!literal.equals(actual)),
            _ => {
                let (Some(actual), Literal::Number(threshold)) = (actual.as_f64(), &literal) else {
                    return Err(CaseError::Expression(format!(
                        "cannot evaluate numeric condition '{}'",
                        expression
                    )));
                };
                Ok(match op {
                    ">=" => actual >= *threshold,
                    "<=" => actual <= *threshold,
                    ">" => actual > *threshold,
                    _ => actual < *threshold,
                })
            }
        }
    }
}

impl ExpressionEvaluator for ConditionEvaluator {
    fn evaluate(&self, expression: &str, variables: &VariableMap) -> CaseResult<bool> {
        for disjunct in expression.split("||") {
            let mut all = true;
            for conjunct in disjunct.split("&&") {
                if !self.evaluate_atom(conjunct, variables)? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn referenced_variables(&self, expression: &str) -> Option<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for atom in expression.split("||").flat_map(|d| d.split("&&")) {
            let atom = atom.trim();
            let key = ["==", "!=", ">=", "<=", ">", "<"]
                .iter()
                .find_map(|op| atom.split_once(*op).map(|(key, _)| key))
                .unwrap_or_else(|| atom.strip_prefix('!').unwrap_or(atom))
                .trim();
            if !key.is_empty() && key != "true" && key != "false" && !names.iter().any(|n| n == key) {
                names.push(key.to_string());
            }
        }
        Some(names)
    }
}

enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Literal {
    fn parse(text: &str) -> Self {
        if let Some(quoted) = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
        {
            return Self::Text(quoted.to_string());
        }
        match text {
            "null" => Self::Null,
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => text
                .parse::<f64>()
                .map(Self::Number)
                .unwrap_or_else(|_| Self::Text(text.to_string())),
        }
    }

    fn equals(&self, actual: &Value) -> bool {
        match (self, actual) {
            (Self::Null, Value::Null) => true,
            (Self::Bool(expected), Value::Boolean(b)) => expected == b,
            (Self::Number(expected), other) => other.as_f64() == Some(*expected),
            (Self::Text(expected), Value::String(s)) => expected == s,
            _ => false,
        }
    }
}
