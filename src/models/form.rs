//! Registration form models

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "form_field_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Phone,
    Number,
    Date,
    Select,
    Radio,
    /// Multiple choice, answered with a list of options
    Checkbox,
    Boolean,
}

impl FieldType {
    /// Types whose answers are picked from `options`
    pub fn uses_options(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Radio | FieldType::Checkbox)
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            FieldType::Text | FieldType::Textarea | FieldType::Email | FieldType::Phone
        )
    }
}

/// Optional per-field constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldValidation {
    pub fn is_empty(&self) -> bool {
        *self == FieldValidation::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventForm {
    pub id: i64,
    pub event_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FormField {
    pub id: i64,
    pub form_id: i64,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub options: Json<Vec<String>>,
    pub placeholder: Option<String>,
    pub position: i32,
    pub validation: Json<FieldValidation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FormField {
    /// The definition part of a stored field, as an organizer would submit it
    pub fn definition(&self) -> FieldDefinition {
        FieldDefinition {
            label: self.label.clone(),
            field_type: self.field_type,
            required: self.required,
            options: self.options.0.clone(),
            placeholder: self.placeholder.clone(),
            validation: self.validation.0.clone(),
        }
    }
}

/// Content of a field, without identity or position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub validation: FieldValidation,
}

/// A field as submitted in a form definition; `id` is set for existing fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInput {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub definition: FieldDefinition,
}

/// Form definition submitted on event creation or form update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldInput>,
}

/// A new field to insert at `position`
#[derive(Debug, Clone, PartialEq)]
pub struct NewField {
    pub position: i32,
    pub definition: FieldDefinition,
}

/// An existing field whose content changed
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub id: i64,
    pub position: i32,
    pub definition: FieldDefinition,
}

/// Batches needed to turn the stored fields into the submitted ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    pub create: Vec<NewField>,
    pub update: Vec<FieldUpdate>,
    pub delete: Vec<i64>,
    /// `(field id, new position)` for fields whose content is unchanged
    pub reorder: Vec<(i64, i32)>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty() && self.reorder.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FormResponse {
    pub id: i64,
    pub registration_id: i64,
    pub form_id: i64,
    pub submitted_at: DateTime<Utc>,
}

/// A form together with its ordered fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormWithFields {
    #[serde(flatten)]
    pub form: EventForm,
    pub fields: Vec<FormField>,
}
