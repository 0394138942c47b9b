//! Services module
//!
//! This module contains business logic services

pub mod auth;
pub mod event;
pub mod export;
pub mod forms;
pub mod notification;
pub mod redis;
pub mod registration;
pub mod scheduler;
pub mod ticket;
pub mod user;

// Re-export commonly used services
pub use auth::{AuthService, Authenticated, ClientInfo, CurrentUser, SessionCookie};
pub use event::EventService;
pub use export::ExportService;
pub use notification::{Mailer, MemoryMailer, NotificationService, NotificationStats, OutgoingMail, SmtpMailer};
pub use redis::{CacheEntry, RedisService};
pub use registration::RegistrationService;
pub use scheduler::{DailyJobs, JobReport, SchedulerHandle};
pub use ticket::TicketService;
pub use user::UserService;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::Settings;
use crate::database::{health_check, DatabasePool, DatabaseService};
use crate::utils::errors::Result;

/// Service factory for creating and managing all services
#[derive(Clone)]
pub struct ServiceFactory {
    pub db: DatabaseService,
    pub auth_service: AuthService,
    pub user_service: UserService,
    pub event_service: EventService,
    pub registration_service: RegistrationService,
    pub export_service: ExportService,
    pub ticket_service: TicketService,
    pub notification_service: NotificationService,
    pub redis_service: Option<RedisService>,
}

impl ServiceFactory {
    /// Create a new ServiceFactory with all services initialized
    pub fn new(settings: &Settings, pool: DatabasePool, mailer: Arc<dyn Mailer>) -> Result<Self> {
        let db = DatabaseService::new(pool);
        let redis_service = settings.redis.as_ref().map(RedisService::new).transpose()?;

        let notification_service = NotificationService::new(mailer);
        let ticket_service = TicketService::new(settings);
        let auth_service = AuthService::new(db.clone(), redis_service.clone(), settings.auth.clone());
        let user_service = UserService::new(db.clone(), auth_service.clone());
        let event_service = EventService::new(db.clone(), notification_service.clone());
        let registration_service = RegistrationService::new(
            db.clone(),
            ticket_service.clone(),
            notification_service.clone(),
            settings.features.clone(),
        );
        let export_service = ExportService::new(db.clone());

        Ok(Self {
            db,
            auth_service,
            user_service,
            event_service,
            registration_service,
            export_service,
            ticket_service,
            notification_service,
            redis_service,
        })
    }

    /// Daily jobs wired to these services
    pub fn daily_jobs(&self, settings: &Settings) -> DailyJobs {
        DailyJobs::new(
            self.db.clone(),
            self.notification_service.clone(),
            self.ticket_service.clone(),
            settings.scheduler.clone(),
        )
    }

    /// Health check for all services
    pub async fn health_check(&self) -> ServiceHealthStatus {
        let database_healthy = match health_check(self.db.pool()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                false
            }
        };

        let redis_healthy = match &self.redis_service {
            Some(redis) => Some(redis.ping().await),
            None => None,
        };

        let mail = self.notification_service.get_stats();
        ServiceHealthStatus {
            database_healthy,
            redis_healthy,
            mail_sent: mail.total_sent,
            mail_failed: mail.total_failed,
        }
    }
}

/// Health status for all services
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthStatus {
    pub database_healthy: bool,
    /// `None` when no cache is configured
    pub redis_healthy: Option<bool>,
    pub mail_sent: u64,
    pub mail_failed: u64,
}

impl ServiceHealthStatus {
    /// Redis is optional; only the database is critical
    pub fn is_healthy(&self) -> bool {
        self.database_healthy
    }

    /// Get list of unhealthy services
    pub fn get_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !self.database_healthy {
            issues.push("Database connection failed".to_string());
        }
        if self.redis_healthy == Some(false) {
            issues.push("Redis connection failed".to_string());
        }

        issues
    }
}
