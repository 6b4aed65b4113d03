//! Workflow restriction analysis.
//!
//! Explains why a state change might be rejected before the caller tries it:
//! whether the state field is a state machine, which transition events the
//! tracker offers from the current state, and which preconditions commonly
//! guarded by workflow rules (an assignee, filled-in fields) are missing.

use crate::codec::{self, FieldKind};
use crate::schema::{IssueField, ProjectSchema, kind_from_issue_type};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields requested for the analysis, including transition events.
pub const DIAGNOSIS_FIELDS_SELECTOR: &str =
    "name,$type,value(name,login,minutes,presentation,text),possibleEvents(id,presentation)";

const STATE_MACHINE_TYPE: &str = "StateMachineIssueCustomField";

/// One transition event the tracker offers from the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Event ID, as sent when firing the event.
    pub id: String,
    /// Display name.
    pub presentation: String,
}

/// What stands between an issue and its next state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDiagnosis {
    /// Analyzed issue.
    pub issue_id: String,
    /// Name of the state field.
    pub state_field: String,
    /// Current state, if set.
    pub current_state: Option<String>,
    /// Whether the field is driven by a state machine rather than free updates.
    pub state_machine: bool,
    /// States the project defines.
    pub available_states: Vec<String>,
    /// Events the tracker offers from the current state.
    pub transitions: Vec<TransitionEvent>,
    /// Whether an assignee is set; `None` when the project has no assignee field.
    pub assignee_set: Option<bool>,
    /// Custom fields without a value.
    pub empty_fields: Vec<String>,
    /// Restrictions detected.
    pub restrictions: Vec<String>,
    /// Next steps.
    pub suggestions: Vec<String>,
}

impl WorkflowDiagnosis {
    /// Build a diagnosis from an issue's custom fields (read with
    /// [`DIAGNOSIS_FIELDS_SELECTOR`]) and its project schema.
    ///
    /// Returns `None` when the issue has no state field.
    #[must_use]
    pub fn analyze(issue_id: &str, fields: &Value, schema: &ProjectSchema) -> Option<Self> {
        let entries = fields.as_array().map(Vec::as_slice).unwrap_or_default();
        let state = entries.iter().find(|entry| is_state_entry(entry, schema))?;

        let state_field = state.get("name").and_then(Value::as_str)?.to_string();
        let wire_type = state.get("$type").and_then(Value::as_str).unwrap_or_default();
        let state_machine = wire_type == STATE_MACHINE_TYPE;
        let current_state = state
            .pointer("/value/name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let transitions: Vec<TransitionEvent> = state
            .get("possibleEvents")
            .and_then(Value::as_array)
            .map(|events| {
                events
                    .iter()
                    .filter_map(|event| {
                        Some(TransitionEvent {
                            id: event.get("id")?.as_str()?.to_string(),
                            presentation: event
                                .get("presentation")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let available_states = schema
            .find(&state_field)
            .and_then(|d| d.allowed_values.clone())
            .unwrap_or_default();

        let others: Vec<IssueField> = entries
            .iter()
            .filter(|entry| entry.get("name").and_then(Value::as_str) != Some(state_field.as_str()))
            .filter_map(|entry| {
                Some(IssueField {
                    name: entry.get("name")?.as_str()?.to_string(),
                    wire_type: entry.get("$type").and_then(Value::as_str).map(str::to_string),
                    value: entry.get("value").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        let assignee_set = others
            .iter()
            .find(|f| f.descriptor().kind == FieldKind::User && f.name.eq_ignore_ascii_case("assignee"))
            .map(|f| !codec::decode(&f.descriptor(), &f.value).is_null());
        let empty_fields: Vec<String> = others
            .iter()
            .filter(|f| codec::decode(&f.descriptor(), &f.value).is_null())
            .map(|f| f.name.clone())
            .collect();

        let mut diagnosis = Self {
            issue_id: issue_id.to_string(),
            state_field,
            current_state,
            state_machine,
            available_states,
            transitions,
            assignee_set,
            empty_fields,
            restrictions: Vec::new(),
            suggestions: Vec::new(),
        };
        diagnosis.advise();
        Some(diagnosis)
    }

    fn advise(&mut self) {
        if self.state_machine {
            self.restrictions.push(
                "The state field is a state machine; only its transition events can change it"
                    .to_string(),
            );
            if self.transitions.is_empty() {
                self.restrictions
                    .push("No transition is available from the current state".to_string());
                self.suggestions.push(
                    "Check that your user may update this issue, or ask an administrator which transitions exist"
                        .to_string(),
                );
            } else {
                let names: Vec<&str> = self
                    .transitions
                    .iter()
                    .map(|t| t.presentation.as_str())
                    .collect();
                self.suggestions
                    .push(format!("Use one of the offered transitions: {}", names.join(", ")));
            }
        } else {
            self.suggestions.push(
                "Direct state updates apply; a rejected update is retried through the command interface"
                    .to_string(),
            );
        }

        if self.assignee_set == Some(false) {
            self.restrictions.push("The issue has no assignee".to_string());
            self.suggestions.push(
                "Workflows often require an assignee before work starts; set one with update_issue_assignee"
                    .to_string(),
            );
        }
        if !self.empty_fields.is_empty() {
            self.suggestions.push(format!(
                "Rules may require these empty fields: {}",
                self.empty_fields.join(", ")
            ));
        }
        if !self.available_states.is_empty() {
            self.suggestions.push(format!(
                "Valid states: {}",
                self.available_states.join(", ")
            ));
        }
    }
}

fn is_state_entry(entry: &Value, schema: &ProjectSchema) -> bool {
    let Some(name) = entry.get("name").and_then(Value::as_str) else {
        return false;
    };
    let by_type = entry
        .get("$type")
        .and_then(Value::as_str)
        .and_then(kind_from_issue_type)
        == Some(FieldKind::State);
    let by_schema = schema
        .state_field()
        .is_some_and(|d| d.name.eq_ignore_ascii_case(name));
    by_type || by_schema || name.eq_ignore_ascii_case("state")
}
