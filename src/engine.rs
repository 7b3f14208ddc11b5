// src/engine.rs - Alarm state machine and event emission engine

use crate::config::{Config, Severity, TagRuleSet};
use crate::error::{Result, WatchError};
use crate::filter::changed_values;
use crate::trigger::{Evaluation, TriggerCondition};
use crate::value::Value;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ==========================================
// EMITTED RECORDS
// ==========================================

/// One emitted alarm transition or event occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stable rule identity, `tag::severity::index`
    pub event_id: String,
    /// Emission timestamp
    pub ts: DateTime<Utc>,
    /// Equipment the tag belongs to
    pub equipment: String,
    /// Tag whose change produced this record
    pub tag: String,
    /// Rule severity (`E` for events)
    pub severity: Severity,
    /// True on an alarm open transition; false on close and on events
    pub is_active: bool,
    /// Snapshot of the trigger condition at emission time
    pub trigger: TriggerCondition,
    /// Configured description
    pub description: String,
}

/// Alarm transitions produced by one update: newly opened and newly closed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlarmDelta {
    /// Alarms that opened on this update
    pub to_add: Vec<EventRecord>,
    /// Alarms that closed on this update
    pub to_update: Vec<EventRecord>,
}

/// Event occurrences produced by one update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventDelta {
    /// Every satisfied event rule, once per qualifying change
    pub to_add: Vec<EventRecord>,
}

/// Everything one processed update batch produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateOutcome {
    /// Alarm open/close transitions
    pub alarms: AlarmDelta,
    /// Stateless event occurrences
    pub events: EventDelta,
    /// Registry sizes after the update; present when the registry changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<AlarmCounts>,
}

impl UpdateOutcome {
    /// True when the update produced no records at all.
    pub fn is_empty(&self) -> bool {
        self.alarms.to_add.is_empty()
            && self.alarms.to_update.is_empty()
            && self.events.to_add.is_empty()
    }
}

// ==========================================
// ACTIVE-ALARM REGISTRY
// ==========================================

/// Currently-open alarm identities, bucketed by severity.
///
/// An identity lives in the bucket of its rule's severity and, because the
/// severity letter is part of the identity, can never appear in two buckets
/// at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAlarms {
    #[serde(rename = "I")]
    info: BTreeSet<String>,
    #[serde(rename = "W")]
    warning: BTreeSet<String>,
    #[serde(rename = "F")]
    fault: BTreeSet<String>,
}

impl ActiveAlarms {
    fn bucket(&self, severity: Severity) -> Option<&BTreeSet<String>> {
        match severity {
            Severity::Info => Some(&self.info),
            Severity::Warning => Some(&self.warning),
            Severity::Fault => Some(&self.fault),
            Severity::Event => None,
        }
    }

    fn bucket_mut(&mut self, severity: Severity) -> Option<&mut BTreeSet<String>> {
        match severity {
            Severity::Info => Some(&mut self.info),
            Severity::Warning => Some(&mut self.warning),
            Severity::Fault => Some(&mut self.fault),
            Severity::Event => None,
        }
    }

    /// Whether an identity is currently open under the given severity.
    pub fn contains(&self, severity: Severity, id: &str) -> bool {
        self.bucket(severity).is_some_and(|b| b.contains(id))
    }

    fn insert(&mut self, severity: Severity, id: String) {
        if let Some(bucket) = self.bucket_mut(severity) {
            bucket.insert(id);
        }
    }

    fn remove(&mut self, severity: Severity, id: &str) {
        if let Some(bucket) = self.bucket_mut(severity) {
            bucket.remove(id);
        }
    }

    /// Open identities under one severity, in identity order. Empty for
    /// [`Severity::Event`].
    pub fn ids(&self, severity: Severity) -> Vec<&str> {
        self.bucket(severity)
            .map(|b| b.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Per-bucket sizes, e.g. `{"I": 1, "W": 0, "F": 2}`.
    pub fn counts(&self) -> AlarmCounts {
        AlarmCounts {
            info: self.info.len(),
            warning: self.warning.len(),
            fault: self.fault.len(),
        }
    }

    /// Total open alarms across all severities.
    pub fn total(&self) -> usize {
        self.info.len() + self.warning.len() + self.fault.len()
    }

    /// True when no alarm is open.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Open-alarm counts per severity bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmCounts {
    /// Open informational alarms
    #[serde(rename = "I")]
    pub info: usize,
    /// Open warning alarms
    #[serde(rename = "W")]
    pub warning: usize,
    /// Open fault alarms
    #[serde(rename = "F")]
    pub fault: usize,
}

// ==========================================
// ENGINE
// ==========================================

/// Evaluation engine for one monitored line.
///
/// Owns its rule set, its active-alarm registry and its last-value
/// snapshot; independent lines get independent engines and share nothing.
/// Each update batch is processed to completion before the next one is
/// accepted, so registry and snapshot mutation needs no locking here.
///
/// # Examples
///
/// ```rust
/// use tagwatch::{AlarmEngine, Config};
///
/// let text = "node_version,1.0\n\
///             ---\n\
///             eqName,tagName,alarm,event\n\
///             Line1,Temp,F:>100:Overheat,\n";
/// let mut engine = AlarmEngine::new(Config::parse(text)?);
///
/// let outcome = engine.process_update(&serde_json::json!({"Temp": 150}))?;
/// assert_eq!(outcome.alarms.to_add.len(), 1);
/// assert_eq!(engine.alarm_counts().fault, 1);
/// # Ok::<(), tagwatch::WatchError>(())
/// ```
#[derive(Debug)]
pub struct AlarmEngine {
    config: Config,
    active: ActiveAlarms,
    snapshot: HashMap<String, Value>,
}

impl AlarmEngine {
    /// Create an engine over a loaded configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            active: ActiveAlarms::default(),
            snapshot: HashMap::new(),
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Currently-open alarms.
    pub fn active_alarms(&self) -> &ActiveAlarms {
        &self.active
    }

    /// Open-alarm counts per severity.
    pub fn alarm_counts(&self) -> AlarmCounts {
        self.active.counts()
    }

    /// Last-seen tag values.
    pub fn remembered_values(&self) -> &HashMap<String, Value> {
        &self.snapshot
    }

    /// Forget all remembered tag values. The next update counts every
    /// primitive member as changed again.
    pub fn clear_snapshot(&mut self) {
        self.snapshot.clear();
    }

    /// Evaluate one tag-update batch.
    ///
    /// The batch must be a JSON object of tag/value members. Members that
    /// are not primitive, or did not change since the last batch, are
    /// ignored; the rest update the snapshot and run through the rules of
    /// the first matching tag row. Produces the alarm open/close
    /// transitions and event occurrences the batch caused; an update that
    /// causes none is an empty outcome, not an error.
    pub fn process_update(&mut self, payload: &Json) -> Result<UpdateOutcome> {
        if self.config.is_empty() {
            return Err(WatchError::EmptyConfig);
        }
        let incoming = match payload.as_object() {
            Some(map) => map,
            None => return Err(WatchError::Input(payload.to_string())),
        };

        let changed = changed_values(&self.snapshot, incoming);
        let mut outcome = UpdateOutcome::default();

        for (tag, value) in changed {
            let numeric = value.as_number();
            self.snapshot.insert(tag.clone(), value);

            // text readings are change-tracked but never evaluated
            let Some(numeric) = numeric else {
                continue;
            };
            let Some(rules) = self.config.find_tag(&tag) else {
                continue;
            };

            check_alarms(&mut self.active, rules, numeric, &mut outcome.alarms);
            check_events(rules, numeric, &mut outcome.events);
        }

        if !outcome.alarms.to_add.is_empty() || !outcome.alarms.to_update.is_empty() {
            outcome.counts = Some(self.active.counts());
        }
        Ok(outcome)
    }

    /// Rewrite the live threshold of a named setpoint.
    ///
    /// Every rule holding the setpoint's condition evaluates against the
    /// new threshold from the next update on; rule structure, identities
    /// and counts never change. Rejections (unknown name, non-finite
    /// value) are logged and otherwise silent.
    pub fn set_setpoint(&self, name: &str, value: f64) {
        if !value.is_finite() {
            warn!(
                "Value of {} must be a number (use 1 for TRUE and 0 for FALSE)",
                name
            );
            return;
        }
        match self.config.setpoints.get(name) {
            Some(cell) => {
                cell.write().value = value;
                debug!("Setpoint {} set to {}", name, value);
            }
            None => debug!("Tag {} is NOT in the config", name),
        }
    }

    /// Bulk setpoint update: a JSON object of `name: value` pairs, or an
    /// array of such objects. Entries are validated independently; one bad
    /// entry never blocks its siblings.
    pub fn set_setpoints(&self, payload: &Json) {
        let entries: Vec<&Json> = match payload {
            Json::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for entry in entries {
            let Some(map) = entry.as_object() else {
                warn!(
                    "Setpoint to be an object, e.g. '{{\"tagName\": 5}}', got {}",
                    entry
                );
                continue;
            };
            for (name, value) in map {
                match value.as_f64() {
                    Some(v) => self.set_setpoint(name, v),
                    None => warn!(
                        "Value of {} must be a number (use 1 for TRUE and 0 for FALSE)",
                        name
                    ),
                }
            }
        }
    }

    /// Snapshot of the live setpoint conditions by name.
    pub fn setpoints(&self) -> BTreeMap<String, TriggerCondition> {
        self.config
            .setpoints
            .iter()
            .map(|(name, cell)| (name.clone(), cell.read().clone()))
            .collect()
    }

    /// Replace the whole registry from previously emitted open records.
    ///
    /// This is the bulk restore path for externally persisted state. Each
    /// record must be marked active, carry an alarm severity and a string
    /// `event_id`; offenders are skipped with a warning while the rest of
    /// the batch is applied.
    pub fn replace_active_alarms(&mut self, records: &[Json]) {
        self.active = ActiveAlarms::default();

        for record in records {
            if !record
                .get("is_active")
                .and_then(Json::as_bool)
                .unwrap_or(false)
            {
                warn!("Skipping alarm record that is not active: {}", record);
                continue;
            }
            let severity = record
                .get("severity")
                .and_then(Json::as_str)
                .and_then(Severity::from_code)
                .filter(|s| s.is_alarm());
            let Some(severity) = severity else {
                warn!(
                    "Alarm severity must be I, W or F, got {}",
                    record.get("severity").unwrap_or(&Json::Null)
                );
                continue;
            };
            let Some(id) = record.get("event_id").and_then(Json::as_str) else {
                warn!(
                    "Alarm event_id must be a string, got {}",
                    record.get("event_id").unwrap_or(&Json::Null)
                );
                continue;
            };
            self.active.insert(severity, id.to_string());
        }

        debug!("Set {} active alarms", self.active.total());
    }
}

/// Run one changed numeric value through a tag's alarm rules.
///
/// The branch is exhaustive: undecided evaluations skip the rule item,
/// steady states (still clear, still open) emit nothing, and exactly one
/// of open/close applies otherwise. An open alarm is never re-emitted on
/// repeated triggering and a closed alarm never emits a duplicate close.
fn check_alarms(active: &mut ActiveAlarms, rules: &TagRuleSet, value: f64, out: &mut AlarmDelta) {
    let ts = Utc::now();

    for (index, rule) in rules.alarm_rules.iter().enumerate() {
        let condition = rule.condition();
        let triggered = match condition.evaluate(value) {
            Evaluation::Undecided => continue,
            Evaluation::Triggered => true,
            Evaluation::Clear => false,
        };

        let id = rule.identity(&rules.tag, index);
        let is_open = active.contains(rule.severity, &id);
        if triggered == is_open {
            continue;
        }

        let mut record = EventRecord {
            event_id: id.clone(),
            ts,
            equipment: rules.equipment.clone(),
            tag: rules.tag.clone(),
            severity: rule.severity,
            is_active: false,
            trigger: condition,
            description: rule.description.clone(),
        };

        if is_open {
            // open and no longer triggered: close
            active.remove(rule.severity, &id);
            out.to_update.push(record);
        } else {
            // closed and now triggered: open
            record.is_active = true;
            active.insert(rule.severity, id);
            out.to_add.push(record);
        }
    }
}

/// Run one changed numeric value through a tag's event rules. Stateless:
/// every satisfied rule emits, with no dedup against prior emissions.
fn check_events(rules: &TagRuleSet, value: f64, out: &mut EventDelta) {
    let ts = Utc::now();

    for (index, rule) in rules.event_rules.iter().enumerate() {
        let condition = rule.condition();
        if condition.evaluate(value) != Evaluation::Triggered {
            continue;
        }
        out.to_add.push(EventRecord {
            event_id: rule.identity(&rules.tag, index),
            ts,
            equipment: rules.equipment.clone(),
            tag: rules.tag.clone(),
            severity: rule.severity,
            is_active: false,
            trigger: condition,
            description: rule.description.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEXT: &str = "node_version,1.0\n\
                        ---\n\
                        eqName,tagName,alarm,event\n\
                        Line1,Temp,F:>100:Overheat|W:>{tempWarn}90:Running hot,\n\
                        Line1,Pump,I:true:Pump started,true:Pump on|false:Pump off\n\
                        Line1,Mode,F:#1:reserved,\n";

    fn engine() -> AlarmEngine {
        AlarmEngine::new(Config::parse(TEXT).unwrap())
    }

    #[test]
    fn test_alarm_opens_and_closes_once() {
        let mut engine = engine();

        // below both thresholds: nothing
        let outcome = engine.process_update(&json!({"Temp": 50})).unwrap();
        assert!(outcome.is_empty());
        assert!(outcome.counts.is_none());

        // above both: fault and warning open
        let outcome = engine.process_update(&json!({"Temp": 150})).unwrap();
        assert_eq!(outcome.alarms.to_add.len(), 2);
        assert!(outcome.alarms.to_update.is_empty());
        let fault = &outcome.alarms.to_add[0];
        assert_eq!(fault.event_id, "Temp::F::0");
        assert_eq!(fault.severity, Severity::Fault);
        assert!(fault.is_active);
        assert_eq!(fault.description, "Overheat");
        assert_eq!(outcome.counts, Some(AlarmCounts { info: 0, warning: 1, fault: 1 }));

        // still above: steady state, nothing re-emitted
        let outcome = engine.process_update(&json!({"Temp": 160})).unwrap();
        assert!(outcome.is_empty());

        // back below both: both close
        let outcome = engine.process_update(&json!({"Temp": 50})).unwrap();
        assert!(outcome.alarms.to_add.is_empty());
        assert_eq!(outcome.alarms.to_update.len(), 2);
        assert!(!outcome.alarms.to_update[0].is_active);
        assert!(engine.active_alarms().is_empty());
    }

    #[test]
    fn test_unchanged_value_emits_nothing() {
        let mut engine = engine();

        let outcome = engine.process_update(&json!({"Temp": 150})).unwrap();
        assert_eq!(outcome.alarms.to_add.len(), 2);

        // same value again: blocked by the change filter
        let outcome = engine.process_update(&json!({"Temp": 150})).unwrap();
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_events_have_no_dedup() {
        let mut engine = engine();

        let outcome = engine.process_update(&json!({"Pump": true})).unwrap();
        assert_eq!(outcome.events.to_add.len(), 1);
        assert_eq!(outcome.events.to_add[0].description, "Pump on");
        assert!(!outcome.events.to_add[0].is_active);
        // the I:true alarm opened alongside
        assert_eq!(outcome.alarms.to_add.len(), 1);

        let outcome = engine.process_update(&json!({"Pump": false})).unwrap();
        assert_eq!(outcome.events.to_add.len(), 1);
        assert_eq!(outcome.events.to_add[0].description, "Pump off");

        // toggling back emits the same event rule again
        let outcome = engine.process_update(&json!({"Pump": true})).unwrap();
        assert_eq!(outcome.events.to_add[0].description, "Pump on");
    }

    #[test]
    fn test_reserved_operator_never_decides() {
        let mut engine = engine();

        let outcome = engine.process_update(&json!({"Mode": 1})).unwrap();
        assert!(outcome.is_empty());
        assert!(engine.active_alarms().is_empty());
    }

    #[test]
    fn test_setpoint_aliasing_on_next_update() {
        let mut engine = engine();

        let outcome = engine.process_update(&json!({"Temp": 95})).unwrap();
        assert_eq!(outcome.alarms.to_add.len(), 1);
        assert_eq!(outcome.alarms.to_add[0].event_id, "Temp::W::1");

        // raise the warning threshold above the current value; the open
        // alarm closes on the next changed reading
        engine.set_setpoint("tempWarn", 99.0);
        let outcome = engine.process_update(&json!({"Temp": 96})).unwrap();
        assert_eq!(outcome.alarms.to_update.len(), 1);
        assert!(engine.active_alarms().is_empty());

        assert_eq!(engine.setpoints()["tempWarn"].value, 99.0);
    }

    #[test]
    fn test_set_setpoint_rejections() {
        let engine = engine();

        engine.set_setpoint("tempWarn", f64::NAN);
        assert_eq!(engine.setpoints()["tempWarn"].value, 90.0);

        // unknown names are ignored
        engine.set_setpoint("unknown", 5.0);
        assert_eq!(engine.setpoints().len(), 1);
    }

    #[test]
    fn test_set_setpoints_bulk_forms() {
        let engine = engine();

        engine.set_setpoints(&json!({"tempWarn": 80}));
        assert_eq!(engine.setpoints()["tempWarn"].value, 80.0);

        engine.set_setpoints(&json!([{"tempWarn": 70}, "not an object"]));
        assert_eq!(engine.setpoints()["tempWarn"].value, 70.0);

        // non-numeric values are rejected per entry
        engine.set_setpoints(&json!({"tempWarn": "high"}));
        assert_eq!(engine.setpoints()["tempWarn"].value, 70.0);
    }

    #[test]
    fn test_empty_config_is_reported_every_time() {
        let text = "node_version,1.0\n---\neqName,tagName,alarm,event\n";
        let mut engine = AlarmEngine::new(Config::parse(text).unwrap());

        for _ in 0..2 {
            assert!(matches!(
                engine.process_update(&json!({"Temp": 1})),
                Err(WatchError::EmptyConfig)
            ));
        }
    }

    #[test]
    fn test_bad_payload_shape_rejects_batch() {
        let mut engine = engine();
        assert!(matches!(
            engine.process_update(&json!(true)),
            Err(WatchError::Input(_))
        ));
        assert!(matches!(
            engine.process_update(&json!([1, 2])),
            Err(WatchError::Input(_))
        ));
        // nothing was remembered from the rejected batches
        assert!(engine.remembered_values().is_empty());
    }

    #[test]
    fn test_clear_snapshot_reactivates_filter() {
        let mut engine = engine();

        engine.process_update(&json!({"Temp": 150})).unwrap();
        assert!(engine.process_update(&json!({"Temp": 150})).unwrap().is_empty());

        engine.clear_snapshot();
        assert!(engine.remembered_values().is_empty());

        // the same reading counts as changed again; the open alarm itself
        // stays open, so only the steady state is observed
        let outcome = engine.process_update(&json!({"Temp": 150})).unwrap();
        assert!(outcome.alarms.to_add.is_empty());
        assert_eq!(engine.alarm_counts().fault, 1);
    }

    #[test]
    fn test_replace_active_alarms_round_trip() {
        let mut engine = engine();

        let mut records: Vec<Json> = Vec::new();
        for payload in [json!({"Temp": 150}), json!({"Pump": true})] {
            let outcome = engine.process_update(&payload).unwrap();
            records.extend(
                outcome
                    .alarms
                    .to_add
                    .iter()
                    .map(|r| serde_json::to_value(r).unwrap()),
            );
        }
        let before = engine.active_alarms().clone();
        assert_eq!(before.total(), 3);

        engine.replace_active_alarms(&[]);
        assert!(engine.active_alarms().is_empty());

        // replaying the open records restores the registry; records that
        // are inactive, mis-typed or unidentified are skipped
        records.push(json!({"event_id": "Ghost::F::9", "severity": "F", "is_active": false}));
        records.push(json!({"event_id": "x::X::0", "severity": "X", "is_active": true}));
        records.push(json!({"severity": "W", "is_active": true}));

        engine.replace_active_alarms(&records);
        assert_eq!(engine.active_alarms(), &before);
    }

    #[test]
    fn test_first_matching_tag_row_wins() {
        let text = "node_version,1.0\n\
                    ---\n\
                    eqName,tagName,alarm,event\n\
                    Line1,Temp,F:>100:first,\n\
                    Line2,Temp,F:>0:second,\n";
        let mut engine = AlarmEngine::new(Config::parse(text).unwrap());

        let outcome = engine.process_update(&json!({"Temp": 50})).unwrap();
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_registry_counts_match_sets() {
        let mut engine = engine();
        assert_eq!(engine.config().tags.len(), 3);

        engine.process_update(&json!({"Temp": 150, "Pump": true})).unwrap();
        let counts = engine.alarm_counts();
        for severity in Severity::ALARMS {
            let open = engine.active_alarms().ids(severity).len();
            let counted = match severity {
                Severity::Info => counts.info,
                Severity::Warning => counts.warning,
                Severity::Fault => counts.fault,
                Severity::Event => unreachable!(),
            };
            assert_eq!(open, counted);
        }
        assert_eq!(engine.active_alarms().total(), 3);
    }
}
