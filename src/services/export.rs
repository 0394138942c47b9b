//! Spreadsheet export of an event's registrations

use std::collections::HashMap;

use rust_xlsxwriter::{Format, Workbook};
use serde_json::Value;
use tracing::info;

use crate::database::DatabaseService;
use crate::database::repositories::form::StoredAnswer;
use crate::models::{Event, FieldType, FormField, RegistrationWithUser};
use crate::services::auth::CurrentUser;
use crate::services::event::ensure_owner;
use crate::utils::errors::{EventBuddyError, Result};
use crate::utils::helpers::sanitize_filename;

pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const FIXED_COLUMNS: [&str; 5] = ["Name", "Email", "Status", "Registered At", "Checked In At"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A finished export
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Column titles: the fixed columns, then the form fields by position
pub fn header_row(fields: &[FormField]) -> Vec<String> {
    let mut fields: Vec<&FormField> = fields.iter().collect();
    fields.sort_by_key(|field| (field.position, field.id));
    FIXED_COLUMNS
        .iter()
        .map(|title| title.to_string())
        .chain(fields.into_iter().map(|field| field.label.clone()))
        .collect()
}

/// Cell text for a stored answer
pub fn answer_text(field_type: FieldType, value: &Value) -> String {
    match (field_type, value) {
        (_, Value::Null) => String::new(),
        (FieldType::Boolean, Value::Bool(flag)) => if *flag { "Yes" } else { "No" }.to_string(),
        (_, Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        (_, Value::String(text)) => text.clone(),
        (_, Value::Number(number)) => match number.as_f64() {
            Some(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", n as i64),
            _ => number.to_string(),
        },
        (_, other) => other.to_string(),
    }
}

/// Build the workbook in memory
pub fn build_workbook(
    fields: &[FormField],
    registrations: &[RegistrationWithUser],
    answers: &[StoredAnswer],
) -> Result<Vec<u8>> {
    let mut ordered: Vec<&FormField> = fields.iter().collect();
    ordered.sort_by_key(|field| (field.position, field.id));

    let mut by_registration: HashMap<i64, HashMap<i64, &Value>> = HashMap::new();
    for answer in answers {
        by_registration
            .entry(answer.registration_id)
            .or_default()
            .insert(answer.field_id, &answer.value.0);
    }

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Registrations")?;

    for (col, title) in header_row(fields).iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, title, &header_format)?;
        sheet.set_column_width(col as u16, 20)?;
    }
    sheet.set_freeze_panes(1, 0)?;

    for (index, registration) in registrations.iter().enumerate() {
        let row = index as u32 + 1;
        sheet.write_string(row, 0, &registration.user_name)?;
        sheet.write_string(row, 1, &registration.user_email)?;
        sheet.write_string(row, 2, registration.status.as_str())?;
        sheet.write_string(row, 3, registration.created_at.format(TIMESTAMP_FORMAT).to_string())?;
        if let Some(at) = registration.checked_in_at {
            sheet.write_string(row, 4, at.format(TIMESTAMP_FORMAT).to_string())?;
        }

        if let Some(values) = by_registration.get(&registration.id) {
            for (offset, field) in ordered.iter().enumerate() {
                if let Some(value) = values.get(&field.id) {
                    let col = (FIXED_COLUMNS.len() + offset) as u16;
                    sheet.write_string(row, col, answer_text(field.field_type, value))?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

pub fn export_filename(event: &Event) -> String {
    sanitize_filename(&format!("{}-registrations.xlsx", event.title))
}

#[derive(Clone)]
pub struct ExportService {
    db: DatabaseService,
}

impl ExportService {
    pub fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    /// Export every registration of an event with its form answers
    pub async fn export_event(&self, user: &CurrentUser, event_id: i64) -> Result<ExportFile> {
        let event = self
            .db
            .events
            .find_by_id(event_id)
            .await?
            .ok_or(EventBuddyError::EventNotFound { event_id })?;
        ensure_owner(user, &event)?;

        let fields = match self.db.form_with_fields(event_id).await? {
            Some(form) => form.fields,
            None => Vec::new(),
        };
        let registrations = self.db.registrations.list_by_event(event_id, None).await?;
        let answers = self.db.forms.answers_for_event(event_id).await?;

        let bytes = build_workbook(&fields, &registrations, &answers)?;
        info!(event_id, rows = registrations.len(), size = bytes.len(), "Registrations exported");
        Ok(ExportFile {
            filename: export_filename(&event),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValidation, RegistrationStatus};
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn field(id: i64, label: &str, field_type: FieldType, position: i32) -> FormField {
        let now = Utc::now();
        FormField {
            id,
            form_id: 1,
            label: label.to_string(),
            field_type,
            required: false,
            options: Json(Vec::new()),
            placeholder: None,
            position,
            validation: Json(FieldValidation::default()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_header_row_orders_fields_by_position() {
        let fields = vec![
            field(2, "Dietary needs", FieldType::Text, 1),
            field(1, "Role", FieldType::Radio, 0),
        ];
        assert_eq!(
            header_row(&fields),
            vec!["Name", "Email", "Status", "Registered At", "Checked In At", "Role", "Dietary needs"]
        );
    }

    #[test]
    fn test_answer_text() {
        assert_eq!(answer_text(FieldType::Checkbox, &json!(["Lindy", "Balboa"])), "Lindy, Balboa");
        assert_eq!(answer_text(FieldType::Boolean, &json!(true)), "Yes");
        assert_eq!(answer_text(FieldType::Boolean, &json!(false)), "No");
        assert_eq!(answer_text(FieldType::Number, &json!(42.0)), "42");
        assert_eq!(answer_text(FieldType::Number, &json!(2.5)), "2.5");
        assert_eq!(answer_text(FieldType::Text, &json!("hello")), "hello");
        assert_eq!(answer_text(FieldType::Text, &Value::Null), "");
    }

    #[test]
    fn test_workbook_is_a_zip_archive() {
        let fields = vec![field(1, "Role", FieldType::Radio, 0)];
        let registrations = vec![RegistrationWithUser {
            id: 5,
            event_id: 1,
            user_id: 9,
            status: RegistrationStatus::CheckedIn,
            ticket_code: Uuid::new_v4(),
            checked_in_at: Some(Utc::now()),
            created_at: Utc::now(),
            user_name: "Ada".to_string(),
            user_email: "ada@example.org".to_string(),
        }];
        let answers = vec![StoredAnswer {
            registration_id: 5,
            field_id: 1,
            value: Json(json!("Lead")),
        }];

        let bytes = build_workbook(&fields, &registrations, &answers).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_empty_export_still_has_header() {
        let bytes = build_workbook(&[], &[], &[]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
