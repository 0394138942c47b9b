//! Daily maintenance jobs
//!
//! Runs once at startup and then every day at `run_hour_utc`: moves events
//! through their date-driven statuses, mails reminders for events starting
//! soon and purges dead sessions. A failing job is logged and the loop
//! carries on.

use std::time::Instant;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::database::DatabaseService;
use crate::services::notification::NotificationService;
use crate::services::ticket::TicketService;
use crate::utils::errors::Result;
use crate::utils::logging::log_job_run;

/// Next run strictly after `now` at `hour:00` UTC
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(time));
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Counts from one pass of the daily jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub events_started: usize,
    pub events_ended: usize,
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    pub sessions_purged: u64,
}

/// Owner of the background task; dropping it does not stop the task
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for the current pass to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

#[derive(Clone)]
pub struct DailyJobs {
    db: DatabaseService,
    notifications: NotificationService,
    tickets: TicketService,
    config: SchedulerConfig,
}

impl DailyJobs {
    pub fn new(
        db: DatabaseService,
        notifications: NotificationService,
        tickets: TicketService,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            notifications,
            tickets,
            config,
        }
    }

    /// Start the background loop
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!(run_hour_utc = self.config.run_hour_utc, "Scheduler started");
            loop {
                self.run_all(Utc::now()).await;

                let now = Utc::now();
                let next = next_run_after(now, self.config.run_hour_utc);
                let wait = (next - now).to_std().unwrap_or_default();
                info!(next_run = %next.to_rfc3339(), "Scheduler sleeping");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }

    /// Run every job once; failures are logged per job
    pub async fn run_all(&self, now: DateTime<Utc>) -> JobReport {
        let mut report = JobReport::default();

        let started = Instant::now();
        match self.update_event_statuses(now).await {
            Ok((began, ended)) => {
                report.events_started = began;
                report.events_ended = ended;
                log_job_run("event_status", (began + ended) as u64, started.elapsed().as_millis() as u64);
            }
            Err(e) => error!(job = "event_status", error = %e, "Scheduled job failed"),
        }

        let started = Instant::now();
        match self.send_reminders(now).await {
            Ok((sent, failed)) => {
                report.reminders_sent = sent;
                report.reminders_failed = failed;
                log_job_run("reminders", sent as u64, started.elapsed().as_millis() as u64);
            }
            Err(e) => error!(job = "reminders", error = %e, "Scheduled job failed"),
        }

        let started = Instant::now();
        match self.db.sessions.purge_expired(now).await {
            Ok(purged) => {
                report.sessions_purged = purged;
                log_job_run("session_purge", purged, started.elapsed().as_millis() as u64);
            }
            Err(e) => error!(job = "session_purge", error = %e, "Scheduled job failed"),
        }

        info!(?report, "Daily jobs finished");
        report
    }

    /// UPCOMING events that have begun become ONGOING; finished ones become ENDED
    pub async fn update_event_statuses(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let started = self.db.events.start_due_events(now).await?;
        let ended = self.db.events.end_due_events(now).await?;
        for event in &started {
            info!(event_id = event.id, "Event started");
        }
        for event in &ended {
            info!(event_id = event.id, "Event ended");
        }
        Ok((started.len(), ended.len()))
    }

    /// Mail attendees of events starting within the reminder window
    pub async fn send_reminders(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let until = now + Duration::hours(self.config.reminder_window_hours);
        let due = self.db.registrations.due_reminders(now, until).await?;

        let (mut sent, mut failed) = (0, 0);
        for reminder in &due {
            let ticket_url = self.tickets.verification_url(reminder.ticket_code);
            let delivered = match self.notifications.reminder_mail(reminder, &ticket_url) {
                Ok(mail) => self.notifications.send("reminder", mail).await,
                Err(e) => Err(e),
            };

            match delivered {
                Ok(()) => {
                    sent += 1;
                    if let Err(e) = self.db.registrations.mark_reminder_sent(reminder.registration_id).await {
                        // mailed but unstamped: it goes out again on the next run
                        error!(registration_id = reminder.registration_id, error = %e, "Reminder not marked as sent");
                    }
                }
                Err(e) => {
                    warn!(registration_id = reminder.registration_id, error = %e, "Reminder not delivered");
                    failed += 1;
                }
            }
        }
        Ok((sent, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_next_run_later_today() {
        assert_eq!(next_run_after(at("2030-03-01T04:30:00Z"), 6), at("2030-03-01T06:00:00Z"));
    }

    #[test]
    fn test_next_run_tomorrow_once_hour_has_passed() {
        assert_eq!(next_run_after(at("2030-03-01T06:00:00Z"), 6), at("2030-03-02T06:00:00Z"));
        assert_eq!(next_run_after(at("2030-12-31T23:59:00Z"), 0), at("2031-01-01T00:00:00Z"));
    }

    #[test]
    fn test_out_of_range_hour_is_clamped() {
        assert_eq!(next_run_after(at("2030-03-01T01:00:00Z"), 99), at("2030-03-01T23:00:00Z"));
    }
}
