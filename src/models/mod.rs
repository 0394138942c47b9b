//! Data models module
//!
//! This module contains all data structures used throughout the application

pub mod user;
pub mod event;
pub mod form;
pub mod registration;
pub mod session;

// Re-export commonly used models
pub use user::{User, Role, CreateUserRequest, UpdateUserRequest};
pub use event::{Event, EventStatus, Capacity, CreateEventRequest, UpdateEventRequest, RegistrationCounts};
pub use form::{
    EventForm, FormField, FieldType, FieldValidation, FieldDefinition, FieldInput, FormInput,
    FieldDiff, NewField, FieldUpdate, FormResponse, FormWithFields,
};
pub use registration::{
    Registration, RegistrationStatus, RegistrationWithUser, CreateRegistrationRequest,
    InvitationOutcome, InvitationReport, ReminderDue,
};
pub use session::{Session, CreateSessionRequest};
