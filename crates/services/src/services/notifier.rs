use async_trait::async_trait;
use db::models::scheduled_talk::ScheduledTalk;
use tracing::info;

/// Outbound reminder channel. Delivery (push, email, SMS) belongs to the
/// surrounding platform.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn remind(&self, scheduled_talk: &ScheduledTalk, talk_title: &str);
}

/// Logs reminders instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn remind(&self, scheduled_talk: &ScheduledTalk, talk_title: &str) {
        info!(
            scheduled_talk_id = %scheduled_talk.id,
            employee_id = %scheduled_talk.employee_id,
            reminder_count = scheduled_talk.reminder_count,
            due_date = %scheduled_talk.due_date,
            "Reminder sent for '{}'",
            talk_title
        );
    }
}
