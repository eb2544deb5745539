use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::scheduled_talk::{
        ScheduledTalk, ScheduledTalkError, ScheduledTalkFilter, ScheduledTalkStatus,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use utils::pagination::{Page, PageParams};
use uuid::Uuid;

use super::{
    content::{ContentError, ContentStore},
    context::RequestContext,
    notifier::Notifier,
};

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("{0}")]
    Validation(String),
    #[error("Scheduled talk not found")]
    NotFound,
    #[error("Scheduled talk is already {0}")]
    AlreadyTerminal(ScheduledTalkStatus),
    #[error("Scheduled talk was modified concurrently (expected version {expected})")]
    Conflict { expected: i64 },
}

impl From<ScheduledTalkError> for AssignmentError {
    fn from(err: ScheduledTalkError) -> Self {
        match err {
            ScheduledTalkError::Database(e) => AssignmentError::Database(e),
            ScheduledTalkError::NotFound => AssignmentError::NotFound,
            ScheduledTalkError::VersionConflict { expected } => AssignmentError::Conflict { expected },
            ScheduledTalkError::AlreadyTerminal(status) => AssignmentError::AlreadyTerminal(status),
        }
    }
}

/// A scheduled talk together with its status at read time.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ScheduledTalkView {
    #[serde(flatten)]
    #[ts(flatten)]
    pub scheduled_talk: ScheduledTalk,
    pub status: ScheduledTalkStatus,
}

impl ScheduledTalkView {
    pub fn at(scheduled_talk: ScheduledTalk, now: DateTime<Utc>) -> Self {
        let status = scheduled_talk.status_at(now);
        Self {
            scheduled_talk,
            status,
        }
    }
}

/// Employee-facing grouping of assignments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum AssignmentBucket {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "in_progress")]
    InProgress,
    #[serde(alias = "overdue")]
    Overdue,
    #[serde(alias = "completed")]
    Completed,
    #[default]
    #[serde(alias = "all")]
    All,
}

impl AssignmentBucket {
    pub fn status(&self) -> Option<ScheduledTalkStatus> {
        match self {
            AssignmentBucket::Pending => Some(ScheduledTalkStatus::Pending),
            AssignmentBucket::InProgress => Some(ScheduledTalkStatus::InProgress),
            AssignmentBucket::Overdue => Some(ScheduledTalkStatus::Overdue),
            AssignmentBucket::Completed => Some(ScheduledTalkStatus::Completed),
            AssignmentBucket::All => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, TS)]
#[ts(export)]
pub struct SweepSummary {
    pub flagged: u64,
    pub cleared: u64,
}

/// Admin and employee reads over scheduled talks, plus the administrative
/// transitions (reminder, cancellation, overdue sweep).
#[derive(Clone)]
pub struct AssignmentService {
    db: DBService,
    content: Arc<dyn ContentStore>,
    notifier: Arc<dyn Notifier>,
}

impl AssignmentService {
    pub fn new(db: DBService, content: Arc<dyn ContentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            content,
            notifier,
        }
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &ScheduledTalkFilter,
        page: PageParams,
    ) -> Result<Page<ScheduledTalkView>, AssignmentError> {
        let (rows, total) = ScheduledTalk::list(
            &self.db.pool,
            ctx.tenant_id,
            filter,
            ctx.now,
            page.limit(),
            page.offset(),
        )
        .await?;

        Ok(Page::new(rows, page, total).map(|row| ScheduledTalkView::at(row, ctx.now)))
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<ScheduledTalkView, AssignmentError> {
        let row = ScheduledTalk::find_by_id(&self.db.pool, ctx.tenant_id, id)
            .await?
            .ok_or(AssignmentError::NotFound)?;
        Ok(ScheduledTalkView::at(row, ctx.now))
    }

    /// The calling employee's own assignments in one bucket.
    pub async fn my_assignments(
        &self,
        ctx: &RequestContext,
        bucket: AssignmentBucket,
        page: PageParams,
    ) -> Result<Page<ScheduledTalkView>, AssignmentError> {
        let employee_id = ctx
            .employee_id
            .ok_or_else(|| AssignmentError::Validation("employee context required".to_string()))?;

        let filter = ScheduledTalkFilter {
            status: bucket.status(),
            employee_id: Some(employee_id),
            ..Default::default()
        };
        self.list(ctx, &filter, page).await
    }

    /// Re-notifies the employee. Only live assignments can be reminded.
    pub async fn send_reminder(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<ScheduledTalkView, AssignmentError> {
        let current = self.get(ctx, id).await?;
        if current.status.is_terminal() {
            return Err(AssignmentError::AlreadyTerminal(current.status));
        }

        let updated = ScheduledTalk::record_reminder(&self.db.pool, id, ctx.now).await?;
        let title = self
            .content
            .talk(ctx.tenant_id, updated.talk_id)
            .await?
            .map(|talk| talk.title)
            .unwrap_or_default();
        self.notifier.remind(&updated, &title).await;

        Ok(ScheduledTalkView::at(updated, ctx.now))
    }

    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<ScheduledTalkView, AssignmentError> {
        // Tenant check before touching the row.
        self.get(ctx, id).await?;

        let mut conn = self.db.pool.acquire().await?;
        let cancelled = ScheduledTalk::cancel(&mut conn, id, reason, ctx.now).await?;

        info!(
            scheduled_talk_id = %id,
            employee_id = %cancelled.employee_id,
            reason = reason.unwrap_or(""),
            "Cancelled scheduled talk"
        );

        Ok(ScheduledTalkView::at(cancelled, ctx.now))
    }

    /// Refreshes the stored overdue reporting flag for one tenant.
    pub async fn sweep_overdue(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SweepSummary, AssignmentError> {
        let (flagged, cleared) = ScheduledTalk::refresh_overdue_flags(&self.db.pool, tenant_id, now).await?;
        if flagged > 0 || cleared > 0 {
            info!(tenant_id = %tenant_id, flagged, cleared, "[OVERDUE_SWEEP] Refreshed overdue flags");
        }
        Ok(SweepSummary { flagged, cleared })
    }

    pub async fn sweep_all_tenants(&self, now: DateTime<Utc>) -> Result<SweepSummary, AssignmentError> {
        let mut total = SweepSummary::default();
        for tenant_id in ScheduledTalk::tenants_with_live_rows(&self.db.pool).await? {
            let summary = self.sweep_overdue(tenant_id, now).await?;
            total.flagged += summary.flagged;
            total.cleared += summary.cleared;
        }
        Ok(total)
    }
}
