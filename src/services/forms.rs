//! Registration form rules
//!
//! Validation of organizer-submitted field definitions, reconciliation of a
//! submitted definition against the stored fields, and validation of attendee
//! answers.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use crate::models::form::{FieldDefinition, FieldDiff, FieldInput, FieldType, FieldUpdate, FormField, NewField};
use crate::utils::errors::{EventBuddyError, FieldErrors, Result};
use crate::utils::helpers::{is_valid_email, is_valid_phone};

pub const MAX_FIELDS: usize = 100;

fn push_error(errors: &mut FieldErrors, key: impl Into<String>, message: impl Into<String>) {
    errors.entry(key.into()).or_default().push(message.into());
}

/// Check a submitted list of field definitions. Errors are keyed `fields[i]`.
pub fn validate_definitions(fields: &[FieldInput]) -> Result<()> {
    let mut errors = FieldErrors::new();

    if fields.len() > MAX_FIELDS {
        push_error(&mut errors, "fields", format!("A form can have at most {} fields", MAX_FIELDS));
    }

    for (index, field) in fields.iter().enumerate() {
        let key = format!("fields[{}]", index);
        for message in definition_problems(&field.definition) {
            push_error(&mut errors, key.clone(), message);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EventBuddyError::Validation(errors))
    }
}

fn definition_problems(definition: &FieldDefinition) -> Vec<String> {
    let mut problems = Vec::new();

    if definition.label.trim().is_empty() {
        problems.push("Label is required".to_string());
    }

    if definition.field_type.uses_options() {
        let mut seen = HashSet::new();
        if definition.options.iter().any(|option| option.trim().is_empty()) {
            problems.push("Options cannot be empty".to_string());
        }
        if definition.options.iter().any(|option| !seen.insert(option.trim())) {
            problems.push("Options must be distinct".to_string());
        }
        if definition.options.is_empty() {
            problems.push("At least one option is required".to_string());
        }
    } else if !definition.options.is_empty() {
        problems.push("Only choice fields can have options".to_string());
    }

    let validation = &definition.validation;
    let has_text_rules = validation.min_length.is_some() || validation.max_length.is_some() || validation.pattern.is_some();
    if has_text_rules && !definition.field_type.is_textual() {
        problems.push("Length and pattern rules apply to text fields only".to_string());
    }
    if let (Some(min), Some(max)) = (validation.min_length, validation.max_length) {
        if min > max {
            problems.push("Minimum length cannot exceed maximum length".to_string());
        }
    }
    if let (Some(min), Some(max)) = (validation.min, validation.max) {
        if min > max {
            problems.push("Minimum cannot exceed maximum".to_string());
        }
    }
    if let Some(pattern) = &validation.pattern {
        if Regex::new(pattern).is_err() {
            problems.push("Pattern is not a valid regular expression".to_string());
        }
    }

    problems
}

/// Work out how to turn `current` into `submitted`.
///
/// The submitted order defines positions `0..n`. Fields with an id must
/// belong to `current`, and each id may appear once. Stored fields missing
/// from the submission are deleted.
pub fn diff_fields(current: &[FormField], submitted: &[FieldInput]) -> Result<FieldDiff> {
    let existing: HashMap<i64, &FormField> = current.iter().map(|field| (field.id, field)).collect();
    let mut seen = HashSet::new();
    let mut diff = FieldDiff::default();

    for (index, input) in submitted.iter().enumerate() {
        let position = index as i32;
        match input.id {
            None => diff.create.push(NewField {
                position,
                definition: input.definition.clone(),
            }),
            Some(id) => {
                let stored = existing.get(&id).ok_or_else(|| {
                    EventBuddyError::field(format!("fields[{}]", index), format!("Field {} does not belong to this form", id))
                })?;
                if !seen.insert(id) {
                    return Err(EventBuddyError::field(
                        format!("fields[{}]", index),
                        format!("Field {} is listed more than once", id),
                    ));
                }

                if stored.definition() != input.definition {
                    diff.update.push(FieldUpdate {
                        id,
                        position,
                        definition: input.definition.clone(),
                    });
                } else if stored.position != position {
                    diff.reorder.push((id, position));
                }
            }
        }
    }

    diff.delete = current
        .iter()
        .filter(|field| !seen.contains(&field.id))
        .map(|field| field.id)
        .collect();

    Ok(diff)
}

/// Validate answers (keyed by field id) against a form. Returns the values to
/// store; empty optional answers are dropped. Errors are keyed by field label.
pub fn validate_response(fields: &[FormField], answers: &HashMap<i64, Value>) -> Result<Vec<(i64, Value)>> {
    let mut errors = FieldErrors::new();
    let known: HashSet<i64> = fields.iter().map(|field| field.id).collect();

    let mut unknown: Vec<i64> = answers.keys().filter(|id| !known.contains(id)).copied().collect();
    unknown.sort_unstable();
    for id in unknown {
        push_error(&mut errors, format!("field {}", id), "Unknown field");
    }

    let mut values = Vec::new();
    for field in fields {
        let answer = answers.get(&field.id).unwrap_or(&Value::Null);

        if is_blank(field, answer) {
            if field.required {
                push_error(&mut errors, field.label.clone(), "This field is required");
            }
            continue;
        }

        match check_answer(field, answer) {
            Ok(value) => values.push((field.id, value)),
            Err(problems) => {
                for problem in problems {
                    push_error(&mut errors, field.label.clone(), problem);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(EventBuddyError::Validation(errors))
    }
}

fn is_blank(field: &FormField, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        // an unticked required consent box counts as unanswered; optional ones store "No"
        Value::Bool(false) => field.required && field.field_type == FieldType::Boolean,
        _ => false,
    }
}

/// Type and rule checks for a non-blank answer, returning the normalised value
fn check_answer(field: &FormField, value: &Value) -> std::result::Result<Value, Vec<String>> {
    let rules = &field.validation.0;
    let options = &field.options.0;

    match field.field_type {
        FieldType::Text | FieldType::Textarea | FieldType::Email | FieldType::Phone => {
            let text = value.as_str().map(str::trim).ok_or_else(|| vec!["Must be text".to_string()])?;
            let mut problems = Vec::new();

            if field.field_type == FieldType::Email && !is_valid_email(text) {
                problems.push("Must be a valid email address".to_string());
            }
            if field.field_type == FieldType::Phone && !is_valid_phone(text) {
                problems.push("Must be a valid phone number".to_string());
            }

            let length = text.chars().count();
            if let Some(min) = rules.min_length {
                if length < min {
                    problems.push(format!("Must be at least {} characters", min));
                }
            }
            if let Some(max) = rules.max_length {
                if length > max {
                    problems.push(format!("Must be at most {} characters", max));
                }
            }
            if let Some(pattern) = &rules.pattern {
                match Regex::new(pattern) {
                    Ok(regex) if !regex.is_match(text) => problems.push("Has an invalid format".to_string()),
                    Ok(_) => {}
                    Err(_) => problems.push("Has an invalid format".to_string()),
                }
            }

            if problems.is_empty() {
                Ok(Value::String(text.to_string()))
            } else {
                Err(problems)
            }
        }
        FieldType::Number => {
            let number = match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|number| number.is_finite())
            .ok_or_else(|| vec!["Must be a number".to_string()])?;

            let mut problems = Vec::new();
            if let Some(min) = rules.min {
                if number < min {
                    problems.push(format!("Must be at least {}", min));
                }
            }
            if let Some(max) = rules.max {
                if number > max {
                    problems.push(format!("Must be at most {}", max));
                }
            }

            if problems.is_empty() {
                serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or_else(|| vec!["Must be a number".to_string()])
            } else {
                Err(problems)
            }
        }
        FieldType::Date => {
            let text = value.as_str().map(str::trim).unwrap_or_default();
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                .map_err(|_| vec!["Must be a date (YYYY-MM-DD)".to_string()])
        }
        FieldType::Select | FieldType::Radio => {
            let choice = value.as_str().ok_or_else(|| vec!["Must be one of the options".to_string()])?;
            if options.iter().any(|option| option == choice) {
                Ok(Value::String(choice.to_string()))
            } else {
                Err(vec![format!("'{}' is not one of the options", choice)])
            }
        }
        FieldType::Checkbox => {
            let items = value.as_array().ok_or_else(|| vec!["Must be a list of options".to_string()])?;
            let mut chosen = Vec::with_capacity(items.len());
            let mut problems = Vec::new();

            for item in items {
                match item.as_str() {
                    Some(choice) if options.iter().any(|option| option == choice) => {
                        if !chosen.contains(&choice) {
                            chosen.push(choice);
                        }
                    }
                    Some(choice) => problems.push(format!("'{}' is not one of the options", choice)),
                    None => problems.push("Must be a list of options".to_string()),
                }
            }

            if problems.is_empty() {
                // keep the organizer's option order
                let ordered: Vec<Value> = options
                    .iter()
                    .filter(|option| chosen.contains(&option.as_str()))
                    .map(|option| Value::String(option.clone()))
                    .collect();
                Ok(Value::Array(ordered))
            } else {
                Err(problems)
            }
        }
        FieldType::Boolean => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| vec!["Must be yes or no".to_string()]),
    }
}
