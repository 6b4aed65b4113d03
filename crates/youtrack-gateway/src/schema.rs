//! Project field schemas and issue field snapshots.
//!
//! The tracker describes a project's custom fields through
//! `admin/projects/{id}/customFields`; this module projects that response
//! onto [`FieldDescriptor`]s. It also reads the `customFields` array of an
//! issue, which the orchestrator uses to learn current values.

use crate::codec::{FieldDescriptor, FieldKind};
use serde_json::Value;

/// `fields` selector for the project custom field listing.
pub const PROJECT_FIELDS_SELECTOR: &str =
    "id,$type,field(name,fieldType(valueType)),bundle(values(name,archived))";

/// `fields` selector for an issue's project and current field values.
pub const ISSUE_FIELDS_SELECTOR: &str =
    "idReadable,project(id,shortName),customFields(name,$type,value(name,login,minutes,presentation,text))";

/// The custom fields attached to one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSchema {
    /// Project the schema belongs to.
    pub project_id: String,
    /// Field descriptors in the tracker's order.
    pub fields: Vec<FieldDescriptor>,
}

impl ProjectSchema {
    /// Parse the project custom field listing. Entries without a name are skipped.
    #[must_use]
    pub fn from_wire(project_id: impl Into<String>, body: &Value) -> Self {
        let fields = body
            .as_array()
            .map(|entries| entries.iter().filter_map(descriptor_from_wire).collect())
            .unwrap_or_default();
        Self {
            project_id: project_id.into(),
            fields,
        }
    }

    /// Find a field by name: exact match first, then ignoring case.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&FieldDescriptor> {
        let name = name.trim();
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    /// The first state-kind field, if the project has one.
    #[must_use]
    pub fn state_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.kind == FieldKind::State)
    }

    /// Field names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

fn descriptor_from_wire(entry: &Value) -> Option<FieldDescriptor> {
    let field = entry.get("field")?;
    let name = field.get("name")?.as_str()?;

    let kind = field
        .pointer("/fieldType/valueType")
        .and_then(Value::as_str)
        .map(FieldKind::from_value_type)
        .or_else(|| {
            entry
                .get("$type")
                .and_then(Value::as_str)
                .and_then(kind_from_project_type)
        })
        .unwrap_or(FieldKind::String);

    let mut descriptor = FieldDescriptor::new(name, kind);
    if kind.has_allowed_values()
        && let Some(values) = entry.pointer("/bundle/values").and_then(Value::as_array)
    {
        descriptor = descriptor.with_allowed(
            values
                .iter()
                .filter(|v| !v.get("archived").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|v| v.get("name").and_then(Value::as_str)),
        );
    }
    Some(descriptor)
}

fn kind_from_project_type(wire_type: &str) -> Option<FieldKind> {
    match wire_type {
        "StateProjectCustomField" => Some(FieldKind::State),
        "EnumProjectCustomField" | "OwnedProjectCustomField" | "VersionProjectCustomField"
        | "BuildProjectCustomField" => Some(FieldKind::EnumSingle),
        "UserProjectCustomField" => Some(FieldKind::User),
        "PeriodProjectCustomField" => Some(FieldKind::Period),
        "TextProjectCustomField" => Some(FieldKind::Text),
        "SimpleProjectCustomField" => Some(FieldKind::String),
        _ => None,
    }
}

/// Kind implied by an issue custom field's `$type`.
#[must_use]
pub fn kind_from_issue_type(wire_type: &str) -> Option<FieldKind> {
    match wire_type {
        "SingleEnumIssueCustomField" | "SingleOwnedIssueCustomField"
        | "SingleVersionIssueCustomField" | "SingleBuildIssueCustomField" => {
            Some(FieldKind::EnumSingle)
        }
        "MultiEnumIssueCustomField" | "MultiOwnedIssueCustomField"
        | "MultiVersionIssueCustomField" | "MultiBuildIssueCustomField" => {
            Some(FieldKind::EnumMulti)
        }
        "StateIssueCustomField" | "StateMachineIssueCustomField" => Some(FieldKind::State),
        "SingleUserIssueCustomField" => Some(FieldKind::User),
        "PeriodIssueCustomField" => Some(FieldKind::Period),
        "TextIssueCustomField" => Some(FieldKind::Text),
        "SimpleIssueCustomField" | "DateIssueCustomField" => Some(FieldKind::String),
        _ => None,
    }
}

/// The project and current custom field values of one issue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueSnapshot {
    /// Readable ID, when the tracker returned it.
    pub id_readable: Option<String>,
    /// Internal project ID.
    pub project_id: Option<String>,
    /// Project short name (the prefix of readable IDs).
    pub project_short_name: Option<String>,
    /// Custom fields as `(name, $type, value)`.
    pub fields: Vec<IssueField>,
}

/// One custom field as attached to an issue.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueField {
    /// Field name.
    pub name: String,
    /// Issue custom field `$type`, when present.
    pub wire_type: Option<String>,
    /// Raw wire value.
    pub value: Value,
}

impl IssueField {
    /// Descriptor inferred from the issue's own `$type`, for decoding without a schema.
    #[must_use]
    pub fn descriptor(&self) -> FieldDescriptor {
        let kind = self
            .wire_type
            .as_deref()
            .and_then(kind_from_issue_type)
            .unwrap_or(FieldKind::String);
        FieldDescriptor::new(self.name.clone(), kind)
    }
}

impl IssueSnapshot {
    /// Parse an issue read with [`ISSUE_FIELDS_SELECTOR`].
    #[must_use]
    pub fn from_wire(body: &Value) -> Self {
        let text = |pointer: &str| body.pointer(pointer).and_then(Value::as_str).map(str::to_string);
        let fields = body
            .get("customFields")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        Some(IssueField {
                            name: entry.get("name")?.as_str()?.to_string(),
                            wire_type: entry.get("$type").and_then(Value::as_str).map(str::to_string),
                            value: entry.get("value").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id_readable: text("/idReadable"),
            project_id: text("/project/id"),
            project_short_name: text("/project/shortName"),
            fields,
        }
    }

    /// The field named `name`, ignoring case.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&IssueField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Project identifier for schema lookups: internal ID, else short name.
    #[must_use]
    pub fn project(&self) -> Option<&str> {
        self.project_id
            .as_deref()
            .or(self.project_short_name.as_deref())
    }
}
