//! Database repositories module
//! 
//! This module contains all repository implementations for data access

pub mod user;
pub mod event;
pub mod form;
pub mod registration;
pub mod session;

// Re-export repositories
pub use user::UserRepository;
pub use event::EventRepository;
pub use form::FormRepository;
pub use registration::RegistrationRepository;
pub use session::SessionRepository;
