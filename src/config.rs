// src/config.rs - Rule configuration loader for the tag alarm DSL

use crate::error::{Result, WatchError};
use crate::trigger::{SharedCondition, TriggerCondition, TriggerMode};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Default field separator for configuration text.
pub const DEFAULT_SEPARATOR: char = ',';

/// Severity class of a configured rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational alarm
    #[serde(rename = "I")]
    Info,
    /// Warning alarm
    #[serde(rename = "W")]
    Warning,
    /// Fault alarm
    #[serde(rename = "F")]
    Fault,
    /// Stateless notification; never enters the active-alarm registry
    #[serde(rename = "E")]
    Event,
}

impl Severity {
    /// Alarm severities in registry order.
    pub const ALARMS: [Severity; 3] = [Severity::Info, Severity::Warning, Severity::Fault];

    /// Single-letter code used by the configuration grammar.
    pub fn code(self) -> char {
        match self {
            Severity::Info => 'I',
            Severity::Warning => 'W',
            Severity::Fault => 'F',
            Severity::Event => 'E',
        }
    }

    /// Case-sensitive parse of a severity letter.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(Severity::Info),
            "W" => Some(Severity::Warning),
            "F" => Some(Severity::Fault),
            "E" => Some(Severity::Event),
            _ => None,
        }
    }

    /// Whether rules of this severity carry open/closed alarm state.
    pub fn is_alarm(self) -> bool {
        !matches!(self, Severity::Event)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One configured alarm or event rule.
#[derive(Debug, Clone)]
pub struct RuleItem {
    /// Alarm severity, or [`Severity::Event`] for event rules
    pub severity: Severity,
    /// Trigger condition, cell shared with the setpoint index
    pub trigger: SharedCondition,
    /// Free-text description carried into emitted records
    pub description: String,
}

impl RuleItem {
    /// Stable identity of this rule: tag name, severity letter and position
    /// in its rule list. Used as the active-alarm registry key; stable as
    /// long as the configuration text and row order do not change.
    pub fn identity(&self, tag: &str, index: usize) -> String {
        format!("{}::{}::{}", tag, self.severity.code(), index)
    }

    /// Snapshot of the live trigger condition.
    pub fn condition(&self) -> TriggerCondition {
        self.trigger.read().clone()
    }
}

/// Rule lists configured for a single tag, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct TagRuleSet {
    /// Tag name the rules apply to
    pub tag: String,
    /// Equipment the tag belongs to
    pub equipment: String,
    /// Stateful alarm rules
    pub alarm_rules: Vec<RuleItem>,
    /// Stateless event rules
    pub event_rules: Vec<RuleItem>,
}

/// Parsed rule configuration.
///
/// The format has three blocks: metadata lines (`key<sep>value`) up to a
/// `---` marker, one header line, then one data row per tag. Cells may be
/// double-quoted, with `""` escaping a literal quote; the `alarm`/`event`
/// cells hold a `|`-separated rule list whose entries are `:`-separated
/// parameters.
///
/// ```text
/// node_version,1.0
/// ---
/// eqName,tagName,alarm,event
/// Line1,Temp,F:>100:Overheat|W:>{tempWarn}90:Running hot,
/// Line1,Pump,I:true:Pump started,true:Pump state changed
/// ```
///
/// The loader fails only on an unreadable file or missing `node_version`
/// metadata; malformed rule entries and rows without a tag name are dropped
/// with a logged warning while their siblings keep loading.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Metadata key/value pairs from the block above the `---` marker
    pub metadata: HashMap<String, String>,
    /// Header names, positionally aligned with the data cells
    pub headers: Vec<String>,
    /// Per-tag rule sets in row order
    pub tags: Vec<TagRuleSet>,
    /// Name-indexed live thresholds, cells shared with the rules above
    pub setpoints: HashMap<String, SharedCondition>,
}

impl Config {
    /// Parse configuration text with the default `,` separator.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_separator(text, DEFAULT_SEPARATOR)
    }

    /// Parse configuration text with an explicit field separator.
    pub fn parse_with_separator(text: &str, separator: char) -> Result<Self> {
        let mut config = Config::default();
        let mut in_meta = true;
        let mut want_header = false;

        for line in text.lines() {
            if line.starts_with("---") {
                in_meta = false;
                want_header = true;
                continue;
            }
            if in_meta {
                if line.trim().is_empty() {
                    continue;
                }
                let mut parts = line.split(separator);
                let key = parts.next().unwrap_or_default();
                let value = parts.next().unwrap_or_default();
                config.metadata.insert(key.to_string(), value.to_string());
                continue;
            }
            if want_header {
                config.headers = split_header(line, separator);
                want_header = false;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            if let Some(rules) =
                parse_row(line, separator, &config.headers, &mut config.setpoints)
            {
                config.tags.push(rules);
            }
        }

        match config.metadata.get("node_version") {
            Some(version) if !version.trim().is_empty() => Ok(config),
            _ => Err(WatchError::Config(
                "'node_version' field is missing in the config metadata.".into(),
            )),
        }
    }

    /// Read and parse a configuration file with the default separator.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_separator(path, DEFAULT_SEPARATOR)
    }

    /// Read and parse a configuration file with an explicit separator.
    pub fn from_file_with_separator(path: impl AsRef<Path>, separator: char) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse_with_separator(&text, separator)
    }

    /// Configuration format version from the metadata block.
    pub fn version(&self) -> Option<&str> {
        self.metadata.get("node_version").map(String::as_str)
    }

    /// First rule set configured for a tag name.
    pub fn find_tag(&self, tag: &str) -> Option<&TagRuleSet> {
        self.tags.iter().find(|t| t.tag == tag)
    }

    /// True when no tag rows were loaded.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Split the header line on the separator, quote-aware, stripping quote
/// characters and trimming each name.
fn split_header(line: &str, separator: char) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.trim().chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            names.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    names.push(current);
    names.iter().map(|name| name.trim().to_string()).collect()
}

/// Tokenize one data row in a single left-to-right scan. A separator splits
/// only outside quotes; a doubled quote inside a quoted cell unescapes to
/// one literal quote; quoting quotes are stripped.
fn split_row(line: &str, separator: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                current.push('"');
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if ch == separator && !in_quotes {
            cells.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    cells.push(current);
    cells
}

fn parse_row(
    line: &str,
    separator: char,
    headers: &[String],
    setpoints: &mut HashMap<String, SharedCondition>,
) -> Option<TagRuleSet> {
    let cells = split_row(line, separator);

    let mut rules = TagRuleSet::default();
    let mut alarm_cell = None;
    let mut event_cell = None;

    for (header, cell) in headers.iter().zip(cells.iter()) {
        match header.as_str() {
            "tagName" => rules.tag = cell.clone(),
            "eqName" => rules.equipment = cell.clone(),
            "alarm" => alarm_cell = Some(cell.as_str()),
            "event" => event_cell = Some(cell.as_str()),
            // unrecognized headers are positional placeholders
            _ => {}
        }
    }

    if rules.tag.is_empty() {
        debug!("Skipping config row without a tag name: {}", line);
        return None;
    }

    if let Some(cell) = alarm_cell {
        rules.alarm_rules = parse_rule_list(cell, TriggerMode::Alarm, setpoints);
    }
    if let Some(cell) = event_cell {
        rules.event_rules = parse_rule_list(cell, TriggerMode::Event, setpoints);
    }
    Some(rules)
}

/// Parse one `alarm` or `event` cell: `|`-separated rule entries, each a
/// `:`-separated parameter list of `[severity?, trigger, ...description]`.
/// The description re-joins the remaining parameters, so it may itself
/// contain `:`. Malformed entries are dropped with a warning.
fn parse_rule_list(
    cell: &str,
    mode: TriggerMode,
    setpoints: &mut HashMap<String, SharedCondition>,
) -> Vec<RuleItem> {
    let mut rules = Vec::new();
    if cell.is_empty() {
        return rules;
    }

    for entry in cell.split('|') {
        let params: Vec<&str> = entry.split(':').collect();

        let (severity, trigger_expr, desc_from) = match mode {
            TriggerMode::Alarm => {
                let code = params[0];
                match Severity::from_code(code).filter(|s| s.is_alarm()) {
                    Some(severity) => (severity, params.get(1).copied(), 2),
                    None => {
                        warn!("Alarm type must be I, W or F, got '{}'", code);
                        continue;
                    }
                }
            }
            TriggerMode::Event => (Severity::Event, params.first().copied(), 1),
        };

        // a missing trigger field is unresolvable by definition
        let condition = trigger_expr
            .map(|expr| TriggerCondition::parse(expr, mode))
            .unwrap_or_else(|| TriggerCondition::parse("?", TriggerMode::Alarm));
        if condition.is_unresolved() {
            warn!("Cannot parse trigger string '{}'", entry);
            continue;
        }

        let description = params
            .get(desc_from..)
            .map(|rest| rest.join(":"))
            .unwrap_or_default();

        let trigger = condition.into_shared();
        if let Some(name) = trigger.read().setpoint.clone() {
            // last writer wins on duplicate names
            setpoints.insert(name, Arc::clone(&trigger));
        }

        rules.push(RuleItem {
            severity,
            trigger,
            description,
        });
    }
    rules
}
