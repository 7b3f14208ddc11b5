// src/trigger.rs - Trigger expression grammar and evaluation

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Comparison operator of a trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerOp {
    /// Strict equality against the threshold
    #[serde(rename = "=")]
    Eq,
    /// Value above the threshold
    #[serde(rename = ">")]
    Gt,
    /// Value below the threshold
    #[serde(rename = "<")]
    Lt,
    /// Accepted by the grammar but reserved: evaluation is always undecided
    #[serde(rename = "#")]
    Indirect,
    /// Marker for an expression the grammar could not resolve
    #[serde(rename = "?")]
    Unresolved,
}

impl fmt::Display for TriggerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            TriggerOp::Eq => '=',
            TriggerOp::Gt => '>',
            TriggerOp::Lt => '<',
            TriggerOp::Indirect => '#',
            TriggerOp::Unresolved => '?',
        };
        write!(f, "{}", c)
    }
}

/// Grammar mode. Event triggers only take the equality, boolean and
/// setpoint forms; alarm triggers additionally accept an operator prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Full grammar, including relational operators
    Alarm,
    /// Restricted grammar for stateless event rules
    Event,
}

/// Three-valued outcome of matching a tag value against one condition.
///
/// `Undecided` is distinct from both hits and misses: it tells the caller
/// to leave the rule's state completely alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The condition is satisfied
    Triggered,
    /// The condition is not satisfied
    Clear,
    /// The condition cannot be evaluated (reserved or unresolved operator)
    Undecided,
}

impl From<bool> for Evaluation {
    fn from(hit: bool) -> Self {
        if hit {
            Evaluation::Triggered
        } else {
            Evaluation::Clear
        }
    }
}

/// One parsed trigger comparison.
///
/// `setpoint` names the externally adjustable threshold this condition is
/// reachable through; the numeric `value` is the live threshold either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    /// Comparison operator
    pub op: TriggerOp,
    /// Live numeric threshold
    pub value: f64,
    /// Setpoint name this condition is addressable by, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<String>,
}

/// Shared-ownership cell over a condition.
///
/// A rule and the setpoint index hold the same cell, so a threshold rewrite
/// through the index is observed by the very next evaluation of the rule.
pub type SharedCondition = Arc<RwLock<TriggerCondition>>;

impl TriggerCondition {
    fn unresolved(setpoint: Option<String>) -> Self {
        Self {
            op: TriggerOp::Unresolved,
            value: 0.0,
            setpoint,
        }
    }

    /// Parse one trigger expression.
    ///
    /// Grammar, first match wins:
    /// 1. a `{name}` substring names a setpoint and is removed before the
    ///    rest is examined;
    /// 2. a finite number, or nothing at all, is an equality threshold
    ///    (the empty remainder parses as 0);
    /// 3. exactly `true`/`false` is an equality against 1/0;
    /// 4. alarm mode only: an operator character `=`, `>`, `<`, `#` or `?`
    ///    followed by an optional finite number.
    ///
    /// Anything else comes back [`TriggerOp::Unresolved`]; the caller
    /// decides whether to drop the rule.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tagwatch::{TriggerCondition, TriggerMode, TriggerOp};
    ///
    /// let cond = TriggerCondition::parse(">{spMax}100", TriggerMode::Alarm);
    /// assert_eq!(cond.op, TriggerOp::Gt);
    /// assert_eq!(cond.value, 100.0);
    /// assert_eq!(cond.setpoint.as_deref(), Some("spMax"));
    /// ```
    pub fn parse(expr: &str, mode: TriggerMode) -> Self {
        let (rest, setpoint) = extract_setpoint(expr);
        let rest = rest.trim();

        if rest.is_empty() {
            return Self {
                op: TriggerOp::Eq,
                value: 0.0,
                setpoint,
            };
        }
        if let Some(value) = parse_number(rest) {
            return Self {
                op: TriggerOp::Eq,
                value,
                setpoint,
            };
        }
        match rest {
            "true" => {
                return Self {
                    op: TriggerOp::Eq,
                    value: 1.0,
                    setpoint,
                }
            }
            "false" => {
                return Self {
                    op: TriggerOp::Eq,
                    value: 0.0,
                    setpoint,
                }
            }
            _ => {}
        }
        if mode == TriggerMode::Event {
            return Self::unresolved(setpoint);
        }

        let mut chars = rest.chars();
        let op = match chars.next() {
            Some('=') => TriggerOp::Eq,
            Some('>') => TriggerOp::Gt,
            Some('<') => TriggerOp::Lt,
            Some('#') => TriggerOp::Indirect,
            _ => return Self::unresolved(setpoint),
        };
        let tail = chars.as_str().trim();
        let value = if tail.is_empty() {
            Some(0.0)
        } else {
            parse_number(tail)
        };
        match value {
            Some(value) => Self { op, value, setpoint },
            None => Self::unresolved(setpoint),
        }
    }

    /// Whether the grammar failed to resolve this condition.
    pub fn is_unresolved(&self) -> bool {
        self.op == TriggerOp::Unresolved
    }

    /// Match a numeric tag value against the live threshold.
    pub fn evaluate(&self, value: f64) -> Evaluation {
        match self.op {
            TriggerOp::Eq => Evaluation::from(value == self.value),
            TriggerOp::Gt => Evaluation::from(value > self.value),
            TriggerOp::Lt => Evaluation::from(value < self.value),
            TriggerOp::Indirect | TriggerOp::Unresolved => Evaluation::Undecided,
        }
    }

    /// Move this condition into a [`SharedCondition`] cell.
    pub fn into_shared(self) -> SharedCondition {
        Arc::new(RwLock::new(self))
    }
}

/// Split a `{name}` setpoint reference out of an expression. The first
/// non-empty reference wins; the braces are removed from the remainder.
fn extract_setpoint(expr: &str) -> (String, Option<String>) {
    let reference = expr.find('{').and_then(|open| {
        let close = open + expr[open..].find('}')?;
        let name = expr[open + 1..close].trim();
        if close == open + 1 {
            None
        } else {
            Some((open, close, name.to_string()))
        }
    });

    match reference {
        Some((open, close, name)) => {
            let mut rest = String::with_capacity(expr.len());
            rest.push_str(&expr[..open]);
            rest.push_str(&expr[close + 1..]);
            let setpoint = if name.is_empty() { None } else { Some(name) };
            (rest, setpoint)
        }
        None => (expr.to_string(), None),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|f| f.is_finite())
}
