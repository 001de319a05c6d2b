//! Playground session rows and their per-variant run slots.
//!
//! Every input row and chat row holds one [`RunSlot`] per displayed
//! variant. A slot remembers the id of the run it is waiting for; results
//! of any other run are stale and dropped.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::enhanced::{generate_id, EnhancedNode};
use crate::messages::create_message_from_schema;
use crate::metadata::{ConfigMetadata, MetadataStore};
use crate::request::TestResult;
use crate::{Error, Result};

/// Execution slot of one (row, variant) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSlot {
    /// Id of the in-flight run, if any
    #[serde(rename = "__isRunning", skip_serializing_if = "Option::is_none")]
    pub is_running: Option<String>,
    #[serde(rename = "__result", skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,
    /// Assistant message built from the result (chat rows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<EnhancedNode>,
}

/// A row of template variable values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestRow {
    pub id: String,
    pub variables: BTreeMap<String, String>,
    #[serde(rename = "__runs")]
    pub runs: BTreeMap<String, RunSlot>,
}

/// A chat turn: the conversation leading up to it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageRow {
    pub id: String,
    pub history: Vec<EnhancedNode>,
    #[serde(rename = "__runs")]
    pub runs: BTreeMap<String, RunSlot>,
}

/// All rows of a playground session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationData {
    pub inputs: Vec<TestRow>,
    pub messages: Vec<MessageRow>,
}

impl TestRow {
    /// Empty row with one blank value per variable
    pub fn new<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: generate_id(),
            variables: variables
                .into_iter()
                .map(|v| (v.into(), String::new()))
                .collect(),
            runs: BTreeMap::new(),
        }
    }
}

impl MessageRow {
    pub fn new(history: Vec<EnhancedNode>) -> Self {
        Self {
            id: generate_id(),
            history,
            runs: BTreeMap::new(),
        }
    }
}

impl GenerationData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input row and return its id
    pub fn add_input_row(&mut self, row: TestRow) -> String {
        let id = row.id.clone();
        self.inputs.push(row);
        id
    }

    /// Add a chat row and return its id
    pub fn add_message_row(&mut self, row: MessageRow) -> String {
        let id = row.id.clone();
        self.messages.push(row);
        id
    }

    /// Keep every input row's variables in step with the prompt variables:
    /// new names get blank values, values of unused names are dropped.
    pub fn sync_variables(&mut self, names: &[String]) {
        for row in &mut self.inputs {
            row.variables.retain(|k, _| names.contains(k));
            for name in names {
                row.variables.entry(name.clone()).or_default();
            }
        }
    }

    pub fn input_row(&self, row_id: &str) -> Option<&TestRow> {
        self.inputs.iter().find(|r| r.id == row_id)
    }

    pub fn message_row(&self, row_id: &str) -> Option<&MessageRow> {
        self.messages.iter().find(|r| r.id == row_id)
    }

    /// Slot of `variant_id` on the input or chat row `row_id`
    pub fn slot(&self, row_id: &str, variant_id: &str) -> Option<&RunSlot> {
        self.inputs
            .iter()
            .find(|r| r.id == row_id)
            .map(|r| &r.runs)
            .or_else(|| self.messages.iter().find(|r| r.id == row_id).map(|r| &r.runs))
            .and_then(|runs| runs.get(variant_id))
    }

    fn runs_mut(&mut self, row_id: &str) -> Result<&mut BTreeMap<String, RunSlot>> {
        if let Some(row) = self.inputs.iter_mut().find(|r| r.id == row_id) {
            return Ok(&mut row.runs);
        }
        self.messages
            .iter_mut()
            .find(|r| r.id == row_id)
            .map(|r| &mut r.runs)
            .ok_or_else(|| Error::run(format!("No row with id '{}'", row_id)))
    }

    /// Start a run on a slot and return its run id. Any earlier result is
    /// cleared and any earlier run becomes stale.
    pub fn begin_run(&mut self, row_id: &str, variant_id: &str) -> Result<String> {
        let run_id = generate_id();
        let slot = self
            .runs_mut(row_id)?
            .entry(variant_id.to_string())
            .or_default();
        slot.is_running = Some(run_id.clone());
        slot.result = None;
        slot.message = None;
        log::debug!("Run {} started for row {} / variant {}", run_id, row_id, variant_id);
        Ok(run_id)
    }

    /// Stop waiting for the slot's run and return the id to cancel, if any.
    pub fn cancel_run(&mut self, row_id: &str, variant_id: &str) -> Result<Option<String>> {
        let cancelled = self
            .runs_mut(row_id)?
            .get_mut(variant_id)
            .and_then(|slot| slot.is_running.take());
        if let Some(run_id) = &cancelled {
            log::debug!("Run {} cancelled", run_id);
        }
        Ok(cancelled)
    }

    /// Store the result of `run_id`. Returns `false` without touching any
    /// state when the slot is no longer waiting for that run.
    pub fn apply_run_result(
        &mut self,
        row_id: &str,
        variant_id: &str,
        run_id: &str,
        result: TestResult,
        message: Option<EnhancedNode>,
    ) -> bool {
        let Ok(runs) = self.runs_mut(row_id) else {
            log::debug!("Dropping result of run {}: row {} is gone", run_id, row_id);
            return false;
        };
        let Some(slot) = runs
            .get_mut(variant_id)
            .filter(|slot| slot.is_running.as_deref() == Some(run_id))
        else {
            log::debug!("Dropping stale result of run {}", run_id);
            return false;
        };
        slot.is_running = None;
        slot.result = Some(result);
        slot.message = message;
        true
    }
}

/// Assistant message for a chat row from a run's `data` output, which is
/// either the message text or a message object.
pub fn assistant_message(
    result: &TestResult,
    message_metadata: &ConfigMetadata,
    store: &MetadataStore,
) -> Option<EnhancedNode> {
    let message = match result.output()? {
        JsonValue::String(text) => json!({"role": "assistant", "content": text}),
        JsonValue::Object(obj) => {
            let mut obj = obj.clone();
            obj.entry("role")
                .or_insert_with(|| JsonValue::String("assistant".to_string()));
            JsonValue::Object(obj)
        }
        _ => return None,
    };
    Some(create_message_from_schema(message_metadata, Some(&message), store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::create_metadata;

    fn session() -> (GenerationData, String) {
        let mut data = GenerationData::new();
        let row_id = data.add_input_row(TestRow::new(["country"]));
        (data, row_id)
    }

    #[test]
    fn test_result_applied_to_current_run() -> crate::Result<()> {
        let (mut data, row) = session();
        let run = data.begin_run(&row, "v1")?;
        assert_eq!(data.slot(&row, "v1").unwrap().is_running.as_deref(), Some(run.as_str()));

        let result = TestResult::success(json!({"data": "Paris"}), 200);
        assert!(data.apply_run_result(&row, "v1", &run, result.clone(), None));
        let slot = data.slot(&row, "v1").unwrap();
        assert_eq!(slot.is_running, None);
        assert_eq!(slot.result.as_ref(), Some(&result));
        Ok(())
    }

    #[test]
    fn test_stale_result_is_discarded() -> crate::Result<()> {
        let (mut data, row) = session();
        let first = data.begin_run(&row, "v1")?;
        let second = data.begin_run(&row, "v1")?;
        let before = data.clone();

        let stale = TestResult::success(json!({"data": "old"}), 200);
        assert!(!data.apply_run_result(&row, "v1", &first, stale, None));
        assert_eq!(data, before);

        assert!(data.apply_run_result(
            &row,
            "v1",
            &second,
            TestResult::success(json!({"data": "new"}), 200),
            None
        ));
        Ok(())
    }

    #[test]
    fn test_cancelled_run_result_is_discarded() -> crate::Result<()> {
        let (mut data, row) = session();
        let run = data.begin_run(&row, "v1")?;
        assert_eq!(data.cancel_run(&row, "v1")?, Some(run.clone()));
        assert_eq!(data.cancel_run(&row, "v1")?, None);

        let before = data.clone();
        assert!(!data.apply_run_result(&row, "v1", &run, TestResult::aborted(), None));
        assert_eq!(data, before);
        Ok(())
    }

    #[test]
    fn test_slots_are_independent_per_variant() -> crate::Result<()> {
        let (mut data, row) = session();
        let a = data.begin_run(&row, "a")?;
        let b = data.begin_run(&row, "b")?;
        assert!(data.apply_run_result(&row, "b", &b, TestResult::aborted(), None));
        assert!(data.apply_run_result(&row, "a", &a, TestResult::aborted(), None));
        assert!(!data.apply_run_result(&row, "a", &b, TestResult::aborted(), None));
        Ok(())
    }

    #[test]
    fn test_unknown_row_is_error() {
        let mut data = GenerationData::new();
        assert!(data.begin_run("missing", "v1").is_err());
        assert!(!data.apply_run_result("missing", "v1", "r", TestResult::aborted(), None));
    }

    #[test]
    fn test_sync_variables() {
        let (mut data, row) = session();
        data.inputs[0].variables.insert("country".into(), "France".into());
        data.sync_variables(&["country".to_string(), "year".to_string()]);
        let vars = &data.input_row(&row).unwrap().variables;
        assert_eq!(vars["country"], "France");
        assert_eq!(vars["year"], "");

        data.sync_variables(&["year".to_string()]);
        assert!(!data.input_row(&row).unwrap().variables.contains_key("country"));
    }

    #[test]
    fn test_assistant_message_on_chat_row() -> crate::Result<()> {
        let store = MetadataStore::new();
        let meta = create_metadata(&json!({
            "type": "object", "title": "Message",
            "properties": {"role": {"type": "string"}, "content": {"type": "string"}}
        }))?
        .unwrap();
        let mut data = GenerationData::new();
        let row = data.add_message_row(MessageRow::new(Vec::new()));
        let run = data.begin_run(&row, "v1")?;

        let result = TestResult::success(json!({"data": "Hello!"}), 200);
        let message = assistant_message(&result, &meta, &store);
        assert_eq!(
            message.as_ref().and_then(|m| m.child_value("content")),
            Some(&json!("Hello!"))
        );
        assert!(data.apply_run_result(&row, "v1", &run, result, message));
        let slot = data.slot(&row, "v1").unwrap();
        assert_eq!(
            slot.message.as_ref().and_then(|m| m.child_value("role")),
            Some(&json!("assistant"))
        );
        Ok(())
    }
}
