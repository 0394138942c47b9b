//! Registration form repository implementation

use sqlx::{PgConnection, PgPool};
use sqlx::types::Json;
use chrono::Utc;
use serde_json::Value;
use crate::models::form::{EventForm, FormField, FormResponse, FieldDiff, FieldDefinition, NewField, FieldUpdate};
use crate::utils::errors::EventBuddyError;

const FORM_COLUMNS: &str = "id, event_id, title, description, created_at, updated_at";
const FIELD_COLUMNS: &str = "id, form_id, label, field_type, required, options, placeholder, position, validation, created_at, updated_at";

/// A stored answer, keyed by registration and field
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAnswer {
    pub registration_id: i64,
    pub field_id: i64,
    pub value: Json<Value>,
}

#[derive(Debug, Clone)]
pub struct FormRepository {
    pool: PgPool,
}

impl FormRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the form of an event
    pub async fn create_form_tx(
        conn: &mut PgConnection,
        event_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<EventForm, EventBuddyError> {
        let form = sqlx::query_as::<_, EventForm>(&format!(
            r#"
            INSERT INTO event_forms (event_id, title, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            FORM_COLUMNS
        ))
        .bind(event_id)
        .bind(title)
        .bind(description)
        .bind(Utc::now())
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(form)
    }

    /// Update form title and description
    pub async fn update_form_tx(
        conn: &mut PgConnection,
        form_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<EventForm, EventBuddyError> {
        let form = sqlx::query_as::<_, EventForm>(&format!(
            "UPDATE event_forms SET title = $2, description = $3, updated_at = $4 WHERE id = $1 RETURNING {}",
            FORM_COLUMNS
        ))
        .bind(form_id)
        .bind(title)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(form)
    }

    /// Find the form of an event
    pub async fn find_by_event(&self, event_id: i64) -> Result<Option<EventForm>, EventBuddyError> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_event_tx(&mut conn, event_id).await
    }

    pub async fn find_by_event_tx(conn: &mut PgConnection, event_id: i64) -> Result<Option<EventForm>, EventBuddyError> {
        let form = sqlx::query_as::<_, EventForm>(&format!(
            "SELECT {} FROM event_forms WHERE event_id = $1",
            FORM_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(conn)
        .await?;

        Ok(form)
    }

    /// Fields of a form ordered by position
    pub async fn fields(&self, form_id: i64) -> Result<Vec<FormField>, EventBuddyError> {
        let mut conn = self.pool.acquire().await?;
        Self::fields_tx(&mut conn, form_id).await
    }

    pub async fn fields_tx(conn: &mut PgConnection, form_id: i64) -> Result<Vec<FormField>, EventBuddyError> {
        let fields = sqlx::query_as::<_, FormField>(&format!(
            "SELECT {} FROM form_fields WHERE form_id = $1 ORDER BY position ASC, id ASC",
            FIELD_COLUMNS
        ))
        .bind(form_id)
        .fetch_all(conn)
        .await?;

        Ok(fields)
    }

    async fn insert_field_tx(conn: &mut PgConnection, form_id: i64, field: &NewField) -> Result<FormField, EventBuddyError> {
        let definition: &FieldDefinition = &field.definition;
        let created = sqlx::query_as::<_, FormField>(&format!(
            r#"
            INSERT INTO form_fields (form_id, label, field_type, required, options, placeholder, position, validation, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            FIELD_COLUMNS
        ))
        .bind(form_id)
        .bind(&definition.label)
        .bind(definition.field_type)
        .bind(definition.required)
        .bind(Json(&definition.options))
        .bind(&definition.placeholder)
        .bind(field.position)
        .bind(Json(&definition.validation))
        .bind(Utc::now())
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(created)
    }

    async fn update_field_tx(conn: &mut PgConnection, form_id: i64, field: &FieldUpdate) -> Result<(), EventBuddyError> {
        let definition = &field.definition;
        sqlx::query(
            r#"
            UPDATE form_fields
            SET label = $3, field_type = $4, required = $5, options = $6,
                placeholder = $7, position = $8, validation = $9, updated_at = $10
            WHERE id = $1 AND form_id = $2
            "#
        )
        .bind(field.id)
        .bind(form_id)
        .bind(&definition.label)
        .bind(definition.field_type)
        .bind(definition.required)
        .bind(Json(&definition.options))
        .bind(&definition.placeholder)
        .bind(field.position)
        .bind(Json(&definition.validation))
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Apply a field diff to a form. Deleted fields take their answers with them.
    pub async fn apply_diff_tx(conn: &mut PgConnection, form_id: i64, diff: &FieldDiff) -> Result<(), EventBuddyError> {
        if !diff.delete.is_empty() {
            sqlx::query("DELETE FROM form_fields WHERE form_id = $1 AND id = ANY($2)")
                .bind(form_id)
                .bind(&diff.delete)
                .execute(&mut *conn)
                .await?;
        }

        for field in &diff.update {
            Self::update_field_tx(&mut *conn, form_id, field).await?;
        }

        for (id, position) in &diff.reorder {
            sqlx::query("UPDATE form_fields SET position = $3, updated_at = $4 WHERE id = $1 AND form_id = $2")
                .bind(id)
                .bind(form_id)
                .bind(position)
                .bind(Utc::now())
                .execute(&mut *conn)
                .await?;
        }

        for field in &diff.create {
            Self::insert_field_tx(&mut *conn, form_id, field).await?;
        }

        Ok(())
    }

    /// Store (or replace) the answers of a registration
    pub async fn save_response_tx(
        conn: &mut PgConnection,
        registration_id: i64,
        form_id: i64,
        answers: &[(i64, Value)],
    ) -> Result<FormResponse, EventBuddyError> {
        let response = sqlx::query_as::<_, FormResponse>(
            r#"
            INSERT INTO form_responses (registration_id, form_id, submitted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (registration_id) DO UPDATE SET form_id = EXCLUDED.form_id, submitted_at = EXCLUDED.submitted_at
            RETURNING id, registration_id, form_id, submitted_at
            "#
        )
        .bind(registration_id)
        .bind(form_id)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM form_field_responses WHERE response_id = $1")
            .bind(response.id)
            .execute(&mut *conn)
            .await?;

        for (field_id, value) in answers {
            sqlx::query("INSERT INTO form_field_responses (response_id, field_id, value) VALUES ($1, $2, $3)")
                .bind(response.id)
                .bind(field_id)
                .bind(Json(value))
                .execute(&mut *conn)
                .await?;
        }

        Ok(response)
    }

    /// Form id and answers currently stored for a registration
    pub async fn response_tx(
        conn: &mut PgConnection,
        registration_id: i64,
    ) -> Result<Option<(i64, Vec<(i64, Value)>)>, EventBuddyError> {
        let rows = sqlx::query_as::<_, (i64, Option<i64>, Option<Json<Value>>)>(
            r#"
            SELECT fr.form_id, ffr.field_id, ffr.value
            FROM form_responses fr
            LEFT JOIN form_field_responses ffr ON ffr.response_id = fr.id
            WHERE fr.registration_id = $1
            ORDER BY ffr.field_id
            "#
        )
        .bind(registration_id)
        .fetch_all(conn)
        .await?;

        let Some((form_id, _, _)) = rows.first() else {
            return Ok(None);
        };
        let form_id = *form_id;
        let values = rows
            .into_iter()
            .filter_map(|(_, field_id, value)| Some((field_id?, value?.0)))
            .collect();
        Ok(Some((form_id, values)))
    }

    pub async fn delete_response_tx(conn: &mut PgConnection, registration_id: i64) -> Result<(), EventBuddyError> {
        sqlx::query("DELETE FROM form_responses WHERE registration_id = $1")
            .bind(registration_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Every stored answer of an event's registrations
    pub async fn answers_for_event(&self, event_id: i64) -> Result<Vec<StoredAnswer>, EventBuddyError> {
        let answers = sqlx::query_as::<_, StoredAnswer>(
            r#"
            SELECT fr.registration_id, ffr.field_id, ffr.value
            FROM form_field_responses ffr
            JOIN form_responses fr ON fr.id = ffr.response_id
            JOIN registrations r ON r.id = fr.registration_id
            WHERE r.event_id = $1
            "#
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_columns_match_model() {
        for column in ["label", "field_type", "options", "position", "validation"] {
            assert!(FIELD_COLUMNS.contains(column));
        }
        assert!(FORM_COLUMNS.starts_with("id, event_id"));
    }
}
