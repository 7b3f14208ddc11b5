//! TAGWATCH - tag alarm and event evaluation engine
//!
//! Ingests periodic numeric/boolean tag readings from an industrial control
//! source, evaluates them against a configurable rule set, and produces two
//! kinds of derived records: stateful **alarms** (raised then later cleared)
//! and stateless, level-triggered **events**.
//!
//! Rules are expressed in a small per-tag configuration language: a metadata
//! block, a header line, and one data row per tag whose `alarm`/`event`
//! cells hold `|`-separated trigger rules. Thresholds may be routed through
//! named setpoints (`{name}`) that are adjustable at runtime without a
//! configuration reload.
//!
//! Message routing, persistence of the registry and path resolution belong
//! to the host; the crate exposes the engine and its side-channel
//! operations and nothing else.
//!
//! # Examples
//!
//! ```rust
//! use tagwatch::{AlarmEngine, Config};
//!
//! let text = "node_version,1.0\n\
//!             ---\n\
//!             eqName,tagName,alarm,event\n\
//!             Line1,Temp,F:>100:Overheat,\n";
//! let mut engine = AlarmEngine::new(Config::parse(text)?);
//!
//! // first reading above the threshold opens the fault alarm
//! let outcome = engine.process_update(&serde_json::json!({"Temp": 150}))?;
//! assert!(outcome.alarms.to_add[0].is_active);
//!
//! // repeating the reading is filtered; nothing is re-emitted
//! assert!(engine.process_update(&serde_json::json!({"Temp": 150}))?.is_empty());
//! # Ok::<(), tagwatch::WatchError>(())
//! ```

#![warn(missing_docs)]

/// Error handling with structured error types
pub mod error;

/// Tag value type and primitive classification
pub mod value;

/// Trigger expression grammar and evaluation
pub mod trigger;

/// Rule configuration loader for the tag alarm DSL
pub mod config;

/// Change detection over incoming update batches
pub mod filter;

/// Alarm state machine and event emission engine
pub mod engine;

pub use config::{Config, RuleItem, Severity, TagRuleSet, DEFAULT_SEPARATOR};
pub use engine::{
    ActiveAlarms, AlarmCounts, AlarmDelta, AlarmEngine, EventDelta, EventRecord, UpdateOutcome,
};
pub use error::{Result, WatchError};
pub use filter::changed_values;
pub use trigger::{Evaluation, SharedCondition, TriggerCondition, TriggerMode, TriggerOp};
pub use value::Value;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
