//! End-to-end flows against PostgreSQL
//!
//! Run with `cargo test -- --ignored`; needs Docker or `TEST_DATABASE_URL`.

mod helpers;

use axum::http::{header, Method, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use serial_test::serial;

use helpers::*;

async fn setup() -> (TestDatabase, TestApp) {
    let database = TestDatabase::new().await.expect("test database");
    let app = TestApp::new(test_settings(), database.pool.clone());
    (database, app)
}

async fn organizer(database: &TestDatabase, app: &TestApp, email: &str) -> String {
    app.signup(email, "Olga Organizer").await;
    database.set_role(email, "ORGANIZER").await.unwrap();
    app.login(email).await
}

fn event_body(title: &str, capacity: Option<i32>, form: Option<Value>) -> Value {
    let start = Utc::now() + Duration::days(2);
    json!({
        "title": title,
        "location": "Main hall",
        "start_date": start,
        "end_date": start + Duration::hours(3),
        "capacity": capacity,
        "form": form,
    })
}

async fn create_event(app: &TestApp, cookie: &str, body: Value) -> Value {
    let response = app.request(Method::POST, "/api/events", Some(body), Some(cookie)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    response.data()
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_register_check_in_and_export() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;

    let form = json!({
        "title": "Attendee details",
        "fields": [
            { "label": "Dietary needs", "field_type": "TEXT", "required": true },
            { "label": "Workshops", "field_type": "CHECKBOX", "options": ["Lindy", "Balboa"] }
        ]
    });
    let detail = create_event(&app, &organizer, event_body("Summer Swing", Some(10), Some(form))).await;
    let event_id = detail["event"]["id"].as_i64().unwrap();
    let fields = detail["form"]["fields"].as_array().unwrap();
    let dietary = fields[0]["id"].as_i64().unwrap();
    let workshops = fields[1]["id"].as_i64().unwrap();

    let attendee = app.signup("ada@example.org", "Ada Attendee").await;

    // Missing required answer
    let response = app
        .request(
            Method::POST,
            &format!("/api/events/{}/register", event_id),
            Some(json!({ "answers": {} })),
            Some(&attendee),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["errors"].is_object());

    let answers = json!({ "answers": { dietary.to_string(): "Vegan", workshops.to_string(): ["Lindy"] } });
    let response = app
        .request(Method::POST, &format!("/api/events/{}/register", event_id), Some(answers), Some(&attendee))
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.data()["status"], "REGISTERED");
    let ticket_code = response.data()["ticket_code"].as_str().unwrap().to_string();

    let mails = app.mailer.sent();
    let confirmation = mails.iter().find(|m| m.to_email == "ada@example.org").unwrap();
    assert!(confirmation.subject.contains("Summer Swing"));
    assert_eq!(confirmation.attachments.len(), 1);

    let response = app.request(Method::GET, "/api/me", None, Some(&attendee)).await;
    assert_eq!(response.data()["registrations"][0]["ticket_code"], ticket_code.as_str());

    let response = app
        .request(Method::GET, &format!("/api/tickets/{}/verify", ticket_code), None, None)
        .await;
    assert_eq!(response.data()["valid"], true);

    let check_in = format!("/api/events/{}/check-in", event_id);
    let response = app
        .request(Method::POST, &check_in, Some(json!({ "ticket": ticket_code })), Some(&organizer))
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.data()["attendee_name"], "Ada Attendee");

    let response = app
        .request(Method::POST, &check_in, Some(json!({ "ticket": ticket_code })), Some(&organizer))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app
        .request(Method::GET, &format!("/api/events/{}/stats", event_id), None, Some(&organizer))
        .await;
    assert_eq!(response.data()["counts"]["checked_in"], 1);
    assert_eq!(response.data()["remaining_capacity"], 9);

    let response = app
        .request(Method::GET, &format!("/api/events/{}/export", event_id), None, Some(&organizer))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.headers[header::CONTENT_DISPOSITION].to_str().unwrap().contains(".xlsx"));
    assert_eq!(&response.bytes[..2], b"PK");

    // Attendees cannot read organizer data
    let response = app
        .request(Method::GET, &format!("/api/events/{}/stats", event_id), None, Some(&attendee))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_capacity_is_released_on_cancel() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;
    let detail = create_event(&app, &organizer, event_body("Tiny workshop", Some(1), None)).await;
    let register = format!("/api/events/{}/register", detail["event"]["id"]);

    let first = app.signup("first@example.org", "First").await;
    let second = app.signup("second@example.org", "Second").await;

    let response = app.request(Method::POST, &register, None, Some(&first)).await;
    assert_eq!(response.status, StatusCode::OK);
    let registration_id = response.data()["id"].as_i64().unwrap();

    let response = app.request(Method::POST, &register, None, Some(&second)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app
        .request(Method::POST, &format!("/api/registrations/{}/cancel", registration_id), None, Some(&first))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.data()["status"], "CANCELLED");

    let response = app.request(Method::POST, &register, None, Some(&second)).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_failed_confirmation_mail_undoes_registration() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;
    let detail = create_event(&app, &organizer, event_body("Mail trouble", Some(5), None)).await;
    let event_id = detail["event"]["id"].as_i64().unwrap();

    let attendee = app.signup("bounce@example.org", "Bounce").await;
    app.mailer.fail_for("bounce@example.org");

    let response = app
        .request(Method::POST, &format!("/api/events/{}/register", event_id), None, Some(&attendee))
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .request(Method::GET, &format!("/api/events/{}/stats", event_id), None, Some(&organizer))
        .await;
    assert_eq!(response.data()["counts"]["registered"], 0);
    assert_eq!(response.data()["remaining_capacity"], 5);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_invitation_accept_flow() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;
    let detail = create_event(&app, &organizer, event_body("Invite only", None, None)).await;
    let event_id = detail["event"]["id"].as_i64().unwrap();

    let response = app
        .request(
            Method::POST,
            &format!("/api/events/{}/invitations", event_id),
            Some(json!({ "emails": ["Guest@Example.org", "guest@example.org"] })),
            Some(&organizer),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.data().as_array().unwrap().len(), 1);

    let invitation = app
        .mailer
        .sent()
        .into_iter()
        .find(|m| m.to_email == "guest@example.org")
        .expect("invitation mail");
    let token = invitation
        .text
        .split("/api/invitations/")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .expect("invitation link")
        .to_string();

    let response = app
        .request(Method::GET, &format!("/api/invitations/{}", token), None, None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.data()["status"], "PENDING");

    let response = app
        .request(Method::POST, &format!("/api/invitations/{}/accept", token), None, None)
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.data()["status"], "REGISTERED");

    let response = app
        .request(Method::POST, &format!("/api/invitations/{}/decline", token), None, None)
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_roles_and_sessions() {
    let (database, app) = setup().await;
    let user = app.signup("user@example.org", "Plain User").await;

    let response = app
        .request(Method::POST, "/api/events", Some(event_body("Nope", None, None)), Some(&user))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app.request(Method::GET, "/api/admin/users", None, Some(&user)).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    // Same cookie from a different browser
    let response = app
        .request_as(Method::GET, "/api/me", None, Some(&user), "AnotherBrowser/9")
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    database.set_role("user@example.org", "ADMIN").await.unwrap();
    let admin = app.login("user@example.org").await;
    let response = app.request(Method::GET, "/api/admin/users?search=plain", None, Some(&admin)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.data()["items"].as_array().unwrap().len(), 1);

    let response = app.request(Method::POST, "/api/auth/logout", None, Some(&admin)).await;
    assert_eq!(response.status, StatusCode::OK);
    let response = app.request(Method::GET, "/api/me", None, Some(&admin)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_daily_jobs_send_each_reminder_once() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;

    let start = Utc::now() + Duration::hours(2);
    let body = json!({
        "title": "Evening social",
        "start_date": start,
        "end_date": start + Duration::hours(4),
    });
    let detail = create_event(&app, &organizer, body).await;
    let register = format!("/api/events/{}/register", detail["event"]["id"]);
    let attendee = app.signup("night@example.org", "Night Owl").await;
    let response = app.request(Method::POST, &register, None, Some(&attendee)).await;
    assert_eq!(response.status, StatusCode::OK);

    let jobs = app.state.services.daily_jobs(&app.state.settings);
    let report = jobs.run_all(Utc::now()).await;
    assert_eq!(report.reminders_sent, 1);
    assert!(app
        .mailer
        .sent()
        .iter()
        .any(|m| m.to_email == "night@example.org" && m.subject.contains("Evening social")));

    let report = jobs.run_all(Utc::now()).await;
    assert_eq!(report.reminders_sent, 0);

    // Once the start has passed the event is ONGOING
    let report = jobs.run_all(start + Duration::minutes(5)).await;
    assert_eq!(report.events_started, 1);
}

async fn admin(database: &TestDatabase, app: &TestApp) -> String {
    app.signup("root@example.org", "Root Admin").await;
    database.set_role("root@example.org", "ADMIN").await.unwrap();
    app.login("root@example.org").await
}

async fn answer_count(database: &TestDatabase, field_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM form_field_responses WHERE field_id = $1")
        .bind(field_id)
        .fetch_one(&database.pool)
        .await
        .unwrap()
}

async fn remaining_capacity(app: &TestApp, cookie: &str, event_id: i64) -> Value {
    let response = app
        .request(Method::GET, &format!("/api/events/{}/stats", event_id), None, Some(cookie))
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    response.data()["remaining_capacity"].clone()
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_form_replacement_keeps_updates_and_drops_deleted_answers() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;

    let form = json!({
        "title": "Details",
        "fields": [
            { "label": "Dietary needs", "field_type": "TEXT" },
            { "label": "T-shirt", "field_type": "SELECT", "options": ["S", "M"] }
        ]
    });
    let detail = create_event(&app, &organizer, event_body("Form changes", Some(10), Some(form))).await;
    let event_id = detail["event"]["id"].as_i64().unwrap();
    let dietary = detail["form"]["fields"][0]["id"].as_i64().unwrap();
    let shirt = detail["form"]["fields"][1]["id"].as_i64().unwrap();

    let attendee = app.signup("ada@example.org", "Ada Attendee").await;
    let answers = json!({ "answers": { dietary.to_string(): "Vegan", shirt.to_string(): "M" } });
    let response = app
        .request(Method::POST, &format!("/api/events/{}/register", event_id), Some(answers), Some(&attendee))
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    let form_path = format!("/api/events/{}/form", event_id);
    let replacement = json!({
        "title": "Details",
        "fields": [
            { "id": shirt, "label": "Shirt size", "field_type": "SELECT", "options": ["S", "M", "L"] },
            { "label": "Pronouns", "field_type": "TEXT" }
        ]
    });
    let response = app.request(Method::PUT, &form_path, Some(replacement), Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    let fields = response.data()["fields"].as_array().unwrap().clone();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0]["id"].as_i64(), Some(shirt));
    assert_eq!(fields[0]["label"], "Shirt size");
    assert_eq!(fields[1]["label"], "Pronouns");
    assert!(fields[0]["position"].as_i64() < fields[1]["position"].as_i64());

    assert_eq!(answer_count(&database, dietary).await, 0);
    assert_eq!(answer_count(&database, shirt).await, 1);

    let unknown = json!({
        "title": "Details",
        "fields": [{ "id": 999999, "label": "Ghost", "field_type": "TEXT" }]
    });
    let response = app.request(Method::PUT, &form_path, Some(unknown), Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_event_cancellation_releases_seats_and_notifies() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;
    let detail = create_event(&app, &organizer, event_body("Rained out", Some(3), None)).await;
    let event_id = detail["event"]["id"].as_i64().unwrap();
    let register = format!("/api/events/{}/register", event_id);

    for email in ["first@example.org", "second@example.org"] {
        let attendee = app.signup(email, "Attendee").await;
        let response = app.request(Method::POST, &register, None, Some(&attendee)).await;
        assert_eq!(response.status, StatusCode::OK);
    }
    let response = app
        .request(
            Method::POST,
            &format!("/api/events/{}/invitations", event_id),
            Some(json!({ "emails": ["guest@example.org"] })),
            Some(&organizer),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(remaining_capacity(&app, &organizer, event_id).await, 1);

    let cancel = format!("/api/events/{}/cancel", event_id);
    let response = app.request(Method::POST, &cancel, None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    let data = response.data();
    assert_eq!(data["registrations_cancelled"], 3);
    assert_eq!(data["notifications_failed"], 0);
    assert_eq!(data["event"]["status"], "CANCELLED");
    assert_eq!(data["event"]["remaining_capacity"], 3);

    let notified: Vec<String> = app
        .mailer
        .sent()
        .into_iter()
        .filter(|m| m.subject.contains("has been cancelled"))
        .map(|m| m.to_email)
        .collect();
    assert_eq!(notified.len(), 3);
    assert!(notified.contains(&"guest@example.org".to_string()));

    let latecomer = app.signup("late@example.org", "Late").await;
    let response = app.request(Method::POST, &register, None, Some(&latecomer)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app.request(Method::POST, &cancel, None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_revoke_and_resend() {
    let (database, app) = setup().await;
    let other = organizer(&database, &app, "otto@example.org").await;
    let organizer = organizer(&database, &app, "olga@example.org").await;
    let detail = create_event(&app, &organizer, event_body("Door policy", Some(2), None)).await;
    let event_id = detail["event"]["id"].as_i64().unwrap();

    let attendee = app.signup("ada@example.org", "Ada Attendee").await;
    let response = app
        .request(Method::POST, &format!("/api/events/{}/register", event_id), None, Some(&attendee))
        .await;
    let registration_id = response.data()["id"].as_i64().unwrap();
    assert_eq!(remaining_capacity(&app, &organizer, event_id).await, 1);

    let revoke = format!("/api/events/{}/registrations/{}/revoke", event_id, registration_id);
    let response = app.request(Method::POST, &revoke, None, Some(&other)).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app.request(Method::POST, &revoke, None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.data()["status"], "CANCELLED");
    assert_eq!(remaining_capacity(&app, &organizer, event_id).await, 2);
    assert!(app
        .mailer
        .sent()
        .iter()
        .any(|m| m.to_email == "ada@example.org" && m.subject.contains("was revoked")));

    let response = app
        .request(
            Method::POST,
            &format!("/api/events/{}/registrations/{}/resend", event_id, registration_id),
            None,
            Some(&organizer),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    app.request(
        Method::POST,
        &format!("/api/events/{}/invitations", event_id),
        Some(json!({ "emails": ["guest@example.org"] })),
        Some(&organizer),
    )
    .await;
    let response = app
        .request(Method::GET, &format!("/api/events/{}/registrations", event_id), None, Some(&organizer))
        .await;
    let invitation_id = response
        .data()
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["user_email"] == "guest@example.org")
        .and_then(|r| r["id"].as_i64())
        .expect("pending invitation");

    let response = app
        .request(
            Method::POST,
            &format!("/api/events/{}/registrations/{}/resend", event_id, invitation_id),
            None,
            Some(&organizer),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.data()["status"], "PENDING");
    let invitations = app
        .mailer
        .sent()
        .into_iter()
        .filter(|m| m.to_email == "guest@example.org" && m.subject.contains("You're invited"))
        .count();
    assert_eq!(invitations, 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_event_with_seat_holders_cannot_be_deleted() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;
    let detail = create_event(&app, &organizer, event_body("Short lived", None, None)).await;
    let event_path = format!("/api/events/{}", detail["event"]["id"]);

    let attendee = app.signup("ada@example.org", "Ada Attendee").await;
    let response = app
        .request(Method::POST, &format!("{}/register", event_path), None, Some(&attendee))
        .await;
    let registration_id = response.data()["id"].as_i64().unwrap();

    let response = app.request(Method::DELETE, &event_path, None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    app.request(
        Method::POST,
        &format!("/api/registrations/{}/cancel", registration_id),
        None,
        Some(&attendee),
    )
    .await;
    let response = app.request(Method::DELETE, &event_path, None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    let response = app.request(Method::GET, &event_path, None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_failed_mail_on_reregistration_restores_previous_answers() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;
    let form = json!({
        "title": "Requests",
        "fields": [{ "label": "Song request", "field_type": "TEXT" }]
    });
    let detail = create_event(&app, &organizer, event_body("Jukebox night", Some(5), Some(form))).await;
    let event_id = detail["event"]["id"].as_i64().unwrap();
    let song = detail["form"]["fields"][0]["id"].as_i64().unwrap();
    let register = format!("/api/events/{}/register", event_id);

    let attendee = app.signup("ada@example.org", "Ada Attendee").await;
    let response = app
        .request(
            Method::POST,
            &register,
            Some(json!({ "answers": { song.to_string(): "Sing Sing Sing" } })),
            Some(&attendee),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let registration_id = response.data()["id"].as_i64().unwrap();
    app.request(
        Method::POST,
        &format!("/api/registrations/{}/cancel", registration_id),
        None,
        Some(&attendee),
    )
    .await;

    app.mailer.fail_for("ada@example.org");
    let response = app
        .request(
            Method::POST,
            &register,
            Some(json!({ "answers": { song.to_string(): "Jumpin' at the Woodside" } })),
            Some(&attendee),
        )
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);

    let stored: sqlx::types::Json<Value> = sqlx::query_scalar(
        "SELECT ffr.value FROM form_field_responses ffr \
         JOIN form_responses fr ON fr.id = ffr.response_id \
         WHERE fr.registration_id = $1 AND ffr.field_id = $2",
    )
    .bind(registration_id)
    .bind(song)
    .fetch_one(&database.pool)
    .await
    .unwrap();
    assert_eq!(stored.0, json!("Sing Sing Sing"));

    let response = app.request(Method::GET, "/api/me", None, Some(&attendee)).await;
    assert_eq!(response.data()["registrations"][0]["status"], "CANCELLED");
    assert_eq!(remaining_capacity(&app, &organizer, event_id).await, 5);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker or TEST_DATABASE_URL"]
async fn test_reminders_continue_when_one_cannot_be_stamped() {
    let (database, app) = setup().await;
    let organizer = organizer(&database, &app, "olga@example.org").await;

    let mut registration_ids = Vec::new();
    for (offset, title, email) in [(2, "Early social", "early@example.org"), (3, "Late social", "late@example.org")] {
        let start = Utc::now() + Duration::hours(offset);
        let body = json!({ "title": title, "start_date": start, "end_date": start + Duration::hours(2) });
        let detail = create_event(&app, &organizer, body).await;
        let attendee = app.signup(email, "Attendee").await;
        let response = app
            .request(Method::POST, &format!("/api/events/{}/register", detail["event"]["id"]), None, Some(&attendee))
            .await;
        registration_ids.push(response.data()["id"].as_i64().unwrap());
    }

    sqlx::query(
        "CREATE OR REPLACE FUNCTION reject_reminder_stamp() RETURNS trigger AS $$ \
         BEGIN RAISE EXCEPTION 'stamp rejected'; END $$ LANGUAGE plpgsql",
    )
    .execute(&database.pool)
    .await
    .unwrap();
    sqlx::query(&format!(
        "CREATE TRIGGER reject_reminder_stamp BEFORE UPDATE OF reminder_sent_at ON registrations \
         FOR EACH ROW WHEN (NEW.id = {}) EXECUTE FUNCTION reject_reminder_stamp()",
        registration_ids[0]
    ))
    .execute(&database.pool)
    .await
    .unwrap();

    let jobs = app.state.services.daily_jobs(&app.state.settings);
    let report = jobs.run_all(Utc::now()).await;

    sqlx::query("DROP TRIGGER reject_reminder_stamp ON registrations")
        .execute(&database.pool)
        .await
        .unwrap();
    sqlx::query("DROP FUNCTION reject_reminder_stamp()")
        .execute(&database.pool)
        .await
        .unwrap();

    assert_eq!(report.reminders_sent, 2);
    assert_eq!(report.reminders_failed, 0);
    let reminded: Vec<String> = app
        .mailer
        .sent()
        .into_iter()
        .filter(|m| m.subject.starts_with("Reminder"))
        .map(|m| m.to_email)
        .collect();
    assert!(reminded.contains(&"early@example.org".to_string()));
    assert!(reminded.contains(&"late@example.org".to_string()));

    // The unstamped reminder goes out again on the next run
    let report = jobs.run_all(Utc::now()).await;
    assert_eq!(report.reminders_sent, 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker and redis, or TEST_DATABASE_URL and TEST_REDIS_URL"]
async fn test_role_change_reaches_cached_sessions() {
    let database = TestDatabase::new().await.expect("test database");
    let cache = TestCache::new().await.expect("test cache");
    let mut settings = test_settings();
    settings.redis = Some(cache.config());
    let app = TestApp::new(settings, database.pool.clone());

    let organizer = organizer(&database, &app, "olga@example.org").await;
    let response = app.request(Method::GET, "/api/me", None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::OK);
    let organizer_id = response.data()["user"]["id"].as_i64().unwrap();

    let admin = admin(&database, &app).await;
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/admin/users/{}", organizer_id),
            Some(json!({ "role": "USER" })),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.data()["role"], "USER");

    let response = app
        .request(Method::POST, "/api/events", Some(event_body("Demoted", None, None)), Some(&organizer))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    // The session itself survives the role change
    let response = app.request(Method::GET, "/api/me", None, Some(&organizer)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.data()["user"]["role"], "USER");
}
