//! Collaborators supplied by the hosting page.
//!
//! A `PageDocument` hands out instructor-authored blocks by exercise id. A
//! `ValueRegistry` receives exported values and decides between defining a
//! fresh name and redefining an existing one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::convert::HostValue;
use crate::environment::DiscardPolicy;
use crate::evaluator::FigureDefaults;
use crate::indicator::IndicatorRegistry;
use crate::render::DependencyRegistry;

pub trait PageDocument: Send + Sync {
    fn setup_blocks(&self, exercise: &str) -> Vec<String>;
    fn check_blocks(&self, exercise: &str) -> Vec<String>;
    fn solution_blocks(&self, exercise: &str) -> Vec<String>;
}

/// First of several blocks of one kind. Extra blocks are ignored with a
/// warning.
pub fn first_block(kind: &str, exercise: &str, blocks: Vec<String>) -> Option<String> {
    if blocks.len() > 1 {
        log::warn!(
            "Multiple `{}` blocks found for exercise \"{}\", using the first.",
            kind,
            exercise
        );
    }
    blocks.into_iter().next()
}

/// Instructor blocks for one exercise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExerciseBlocks {
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub check: Vec<String>,
    #[serde(default)]
    pub solution: Vec<String>,
}

/// In-memory page, as loaded from a page file.
#[derive(Debug, Clone, Default)]
pub struct StaticDocument {
    exercises: HashMap<String, ExerciseBlocks>,
}

impl StaticDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_exercises(exercises: HashMap<String, ExerciseBlocks>) -> Self {
        Self { exercises }
    }

    fn blocks_mut(&mut self, exercise: &str) -> &mut ExerciseBlocks {
        self.exercises.entry(exercise.to_string()).or_default()
    }

    pub fn with_setup(mut self, exercise: &str, code: &str) -> Self {
        self.blocks_mut(exercise).setup.push(code.to_string());
        self
    }

    pub fn with_check(mut self, exercise: &str, code: &str) -> Self {
        self.blocks_mut(exercise).check.push(code.to_string());
        self
    }

    pub fn with_solution(mut self, exercise: &str, code: &str) -> Self {
        self.blocks_mut(exercise).solution.push(code.to_string());
        self
    }

    fn blocks(&self, exercise: &str, pick: fn(&ExerciseBlocks) -> &Vec<String>) -> Vec<String> {
        self.exercises.get(exercise).map(|b| pick(b).clone()).unwrap_or_default()
    }
}

impl PageDocument for StaticDocument {
    fn setup_blocks(&self, exercise: &str) -> Vec<String> {
        self.blocks(exercise, |b| &b.setup)
    }

    fn check_blocks(&self, exercise: &str) -> Vec<String> {
        self.blocks(exercise, |b| &b.check)
    }

    fn solution_blocks(&self, exercise: &str) -> Vec<String> {
        self.blocks(exercise, |b| &b.solution)
    }
}

pub trait ValueRegistry: Send + Sync {
    fn contains(&self, name: &str) -> bool;
    fn define(&self, name: &str, value: HostValue);
    fn redefine(&self, name: &str, value: HostValue);

    /// Redefines `name` in place when it exists, defines it otherwise.
    fn publish(&self, name: &str, value: HostValue) {
        if self.contains(name) {
            self.redefine(name, value);
        } else {
            self.define(name, value);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StoredValue {
    value: HostValue,
    /// Number of in-place redefinitions since the name was first defined.
    revision: u32,
}

/// Registry keeping exported values in memory.
#[derive(Debug, Default)]
pub struct ValueStore {
    values: Mutex<BTreeMap<String, StoredValue>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredValue>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<HostValue> {
        self.values().get(name).map(|v| v.value.clone())
    }

    pub fn revision(&self, name: &str) -> Option<u32> {
        self.values().get(name).map(|v| v.revision)
    }

    pub fn names(&self) -> Vec<String> {
        self.values().keys().cloned().collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values()
                .iter()
                .map(|(k, v)| (k.clone(), v.value.to_json()))
                .collect(),
        )
    }
}

impl ValueRegistry for ValueStore {
    fn contains(&self, name: &str) -> bool {
        self.values().contains_key(name)
    }

    fn define(&self, name: &str, value: HostValue) {
        self.values()
            .insert(name.to_string(), StoredValue { value, revision: 0 });
    }

    fn redefine(&self, name: &str, value: HostValue) {
        let mut values = self.values();
        match values.get_mut(name) {
            Some(stored) => {
                stored.value = value;
                stored.revision += 1;
            }
            None => {
                values.insert(name.to_string(), StoredValue { value, revision: 0 });
            }
        }
    }
}

/// Page-wide collaborators shared by every evaluator and grader on a page.
#[derive(Clone)]
pub struct PageServices {
    pub document: Arc<dyn PageDocument>,
    pub values: Arc<dyn ValueRegistry>,
    pub dependencies: Arc<DependencyRegistry>,
    pub indicators: Arc<IndicatorRegistry>,
    pub figure: FigureDefaults,
    pub discard: DiscardPolicy,
    /// Seconds allowed for checking code.
    pub grading_timelimit: f64,
}

impl Default for PageServices {
    fn default() -> Self {
        Self {
            document: Arc::new(StaticDocument::new()),
            values: Arc::new(ValueStore::new()),
            dependencies: Arc::new(DependencyRegistry::default()),
            indicators: IndicatorRegistry::new(),
            figure: FigureDefaults::default(),
            discard: DiscardPolicy::default(),
            grading_timelimit: 600.0,
        }
    }
}

impl PageServices {
    pub fn with_document(mut self, document: Arc<dyn PageDocument>) -> Self {
        self.document = document;
        self
    }

    pub fn with_values(mut self, values: Arc<dyn ValueRegistry>) -> Self {
        self.values = values;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_block_wins() {
        let doc = StaticDocument::new()
            .with_solution("ex1", "x <- 1")
            .with_solution("ex1", "x <- 2");
        assert_eq!(
            first_block("solution", "ex1", doc.solution_blocks("ex1")),
            Some("x <- 1".to_string())
        );
        assert_eq!(first_block("check", "ex1", doc.check_blocks("ex1")), None);
        assert!(doc.setup_blocks("missing").is_empty());
    }

    #[test]
    fn publish_defines_then_redefines() {
        let store = ValueStore::new();
        store.publish("x", HostValue::Number(1.0));
        assert_eq!(store.revision("x"), Some(0));
        store.publish("x", HostValue::Number(2.0));
        assert_eq!(store.revision("x"), Some(1));
        assert_eq!(store.get("x"), Some(HostValue::Number(2.0)));
        assert_eq!(store.to_json(), serde_json::json!({"x": 2.0}));
    }
}
