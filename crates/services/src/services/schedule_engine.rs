use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use db::{
    DBService,
    models::{
        employee::{Employee, EmployeeError},
        scheduled_talk::{NewScheduledTalk, ScheduledTalk, ScheduledTalkError},
        toolbox_talk_schedule::{
            CreateSchedule, ScheduleError, ScheduleStatus, ToolboxTalkSchedule,
        },
    },
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use utils::pagination::{Page, PageParams};
use uuid::Uuid;

use super::{
    config::Config,
    content::{ContentError, ContentStore},
    context::RequestContext,
    recurrence,
};

#[derive(Debug, Error)]
pub enum ScheduleEngineError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    ScheduledTalk(#[from] ScheduledTalkError),
    #[error(transparent)]
    Employee(#[from] EmployeeError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Validation(String),
    #[error("Schedule not found")]
    NotFound,
    #[error("Schedule is {0}")]
    NotActive(ScheduleStatus),
    #[error("Schedule is already {0}")]
    AlreadyTerminal(ScheduleStatus),
}

/// Outcome of expanding one schedule.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ProcessSummary {
    pub schedule_id: Uuid,
    pub occurrences: Vec<NaiveDate>,
    pub created: usize,
    pub skipped_existing: usize,
    pub next_run_date: Option<NaiveDate>,
    pub status: ScheduleStatus,
}

impl ProcessSummary {
    fn start(schedule: &ToolboxTalkSchedule) -> Self {
        Self {
            schedule_id: schedule.id,
            occurrences: Vec::new(),
            created: 0,
            skipped_existing: 0,
            next_run_date: schedule.next_run_date,
            status: schedule.status,
        }
    }
}

/// Last instant of the grace window: `occurrence + grace_days` at 23:59:59 UTC.
pub fn due_date_for(occurrence: NaiveDate, grace_days: i64) -> DateTime<Utc> {
    occurrence.and_time(NaiveTime::MIN).and_utc() + Duration::days(grace_days + 1)
        - Duration::seconds(1)
}

/// Expands active schedules into scheduled talks, one per employee and
/// occurrence.
///
/// Two passes over the same schedule never run concurrently inside one
/// process; across processes the unique occurrence index and the guarded
/// `next_run_date` advance keep expansion exactly-once.
#[derive(Clone)]
pub struct ScheduleEngine {
    db: DBService,
    content: Arc<dyn ContentStore>,
    due_grace_days: i64,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ScheduleEngine {
    pub fn new(db: DBService, content: Arc<dyn ContentStore>, config: &Config) -> Self {
        Self {
            db,
            content,
            due_grace_days: config.due_grace_days,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn create_schedule(
        &self,
        ctx: &RequestContext,
        data: CreateSchedule,
    ) -> Result<ToolboxTalkSchedule, ScheduleEngineError> {
        if let Some(end) = data.end_date
            && end < data.start_date
        {
            return Err(ScheduleEngineError::Validation(
                "end_date must not be before start_date".to_string(),
            ));
        }
        if !data.assign_to_all && data.employee_ids.is_empty() {
            return Err(ScheduleEngineError::Validation(
                "employee_ids must not be empty unless assign_to_all is set".to_string(),
            ));
        }
        if self.content.talk(ctx.tenant_id, data.talk_id).await?.is_none() {
            return Err(ScheduleEngineError::Validation(format!(
                "talk {} does not exist",
                data.talk_id
            )));
        }

        let schedule =
            ToolboxTalkSchedule::create(&self.db.pool, ctx.tenant_id, ctx.user_id, &data).await?;

        info!(
            schedule_id = %schedule.id,
            talk_id = %schedule.talk_id,
            frequency = %schedule.frequency,
            status = %schedule.status,
            "Created toolbox talk schedule"
        );

        Ok(schedule)
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<ToolboxTalkSchedule, ScheduleEngineError> {
        ToolboxTalkSchedule::find_by_id(&self.db.pool, ctx.tenant_id, id)
            .await?
            .ok_or(ScheduleEngineError::NotFound)
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        status: Option<ScheduleStatus>,
        page: PageParams,
    ) -> Result<Page<ToolboxTalkSchedule>, ScheduleEngineError> {
        let (items, total) = ToolboxTalkSchedule::list(
            &self.db.pool,
            ctx.tenant_id,
            status,
            page.limit(),
            page.offset(),
        )
        .await?;
        Ok(Page::new(items, page, total))
    }

    pub async fn activate(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<ToolboxTalkSchedule, ScheduleEngineError> {
        match ToolboxTalkSchedule::activate(&self.db.pool, ctx.tenant_id, id).await? {
            Some(schedule) => {
                info!(schedule_id = %id, next_run_date = ?schedule.next_run_date, "Activated schedule");
                Ok(schedule)
            }
            None => {
                let current = self.get(ctx, id).await?;
                if current.status.is_terminal() {
                    Err(ScheduleEngineError::AlreadyTerminal(current.status))
                } else {
                    Err(ScheduleEngineError::Validation(format!(
                        "only draft schedules can be activated (schedule is {})",
                        current.status
                    )))
                }
            }
        }
    }

    /// Stops future expansion. Talks already created are left alone.
    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<ToolboxTalkSchedule, ScheduleEngineError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        match ToolboxTalkSchedule::cancel(&self.db.pool, ctx.tenant_id, id).await? {
            Some(schedule) => {
                info!(schedule_id = %id, "Cancelled schedule");
                Ok(schedule)
            }
            None => {
                let current = self.get(ctx, id).await?;
                Err(ScheduleEngineError::AlreadyTerminal(current.status))
            }
        }
    }

    /// One pass over every due schedule of the tenant. A failing schedule is
    /// logged and skipped; the rest of the pass continues.
    pub async fn process_due(
        &self,
        ctx: &RequestContext,
        as_of: NaiveDate,
    ) -> Result<Vec<ProcessSummary>, ScheduleEngineError> {
        let due = ToolboxTalkSchedule::find_due(&self.db.pool, ctx.tenant_id, as_of).await?;
        let mut summaries = Vec::with_capacity(due.len());

        for schedule in due {
            match self.process_schedule(ctx, schedule.id, as_of).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!(
                        schedule_id = %schedule.id,
                        tenant_id = %ctx.tenant_id,
                        "Schedule expansion failed: {}",
                        e
                    );
                }
            }
        }

        Ok(summaries)
    }

    /// Runs `process_due` for every tenant with due schedules. A tenant
    /// whose pass fails is logged and skipped.
    pub async fn process_all_tenants(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<ProcessSummary>, ScheduleEngineError> {
        let mut summaries = Vec::new();
        for tenant_id in ToolboxTalkSchedule::tenants_with_due(&self.db.pool, as_of).await? {
            let ctx = RequestContext::system(tenant_id);
            match self.process_due(&ctx, as_of).await {
                Ok(tenant_summaries) => summaries.extend(tenant_summaries),
                Err(e) => error!(tenant_id = %tenant_id, "Tenant schedule pass failed: {}", e),
            }
        }
        Ok(summaries)
    }

    /// Expands every occurrence from `next_run_date` through `as_of`.
    pub async fn process_schedule(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        as_of: NaiveDate,
    ) -> Result<ProcessSummary, ScheduleEngineError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut schedule = self.get(ctx, id).await?;
        if schedule.status != ScheduleStatus::Active {
            return Err(ScheduleEngineError::NotActive(schedule.status));
        }

        let mut summary = ProcessSummary::start(&schedule);
        let due = schedule.next_run_date.map_or_else(Vec::new, |next_run| {
            recurrence::due_occurrences(
                schedule.frequency,
                schedule.start_date,
                schedule.end_date,
                next_run,
                as_of,
            )
        });
        for occurrence in due {
            let (created, skipped, advanced) =
                self.expand_occurrence(&schedule, occurrence, ctx.now).await?;
            summary.occurrences.push(occurrence);
            summary.created += created;
            summary.skipped_existing += skipped;
            schedule = advanced;
        }
        summary.next_run_date = schedule.next_run_date;
        summary.status = schedule.status;

        if summary.occurrences.is_empty() {
            debug!(schedule_id = %id, %as_of, "Schedule not due");
        }

        Ok(summary)
    }

    /// Expands the pending occurrence immediately, whatever its date.
    pub async fn process_now(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<ProcessSummary, ScheduleEngineError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let schedule = self.get(ctx, id).await?;
        if schedule.status != ScheduleStatus::Active {
            return Err(ScheduleEngineError::NotActive(schedule.status));
        }

        let mut summary = ProcessSummary::start(&schedule);
        if let Some(occurrence) = schedule.next_run_date {
            let (created, skipped, advanced) =
                self.expand_occurrence(&schedule, occurrence, ctx.now).await?;
            summary.occurrences.push(occurrence);
            summary.created = created;
            summary.skipped_existing = skipped;
            summary.next_run_date = advanced.next_run_date;
            summary.status = advanced.status;
        }

        info!(
            schedule_id = %id,
            created = summary.created,
            "Processed schedule on demand"
        );

        Ok(summary)
    }

    fn lock_for(&self, schedule_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(schedule_id).or_default().clone()
    }

    async fn target_employees(
        &self,
        schedule: &ToolboxTalkSchedule,
    ) -> Result<Vec<Uuid>, ScheduleEngineError> {
        if schedule.assign_to_all {
            return Ok(Employee::find_active_ids(&self.db.pool, schedule.tenant_id).await?);
        }

        let listed = ToolboxTalkSchedule::employee_ids(&self.db.pool, schedule.id).await?;
        let active = Employee::filter_active(&self.db.pool, schedule.tenant_id, &listed).await?;
        if active.len() < listed.len() {
            warn!(
                schedule_id = %schedule.id,
                skipped = listed.len() - active.len(),
                "Skipping inactive or unknown employees"
            );
        }
        Ok(active)
    }

    /// Creates the occurrence's talks and advances the schedule in one
    /// transaction. Nothing is committed if any insert or the advance fails.
    async fn expand_occurrence(
        &self,
        schedule: &ToolboxTalkSchedule,
        occurrence: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize, ToolboxTalkSchedule), ScheduleEngineError> {
        let employees = self.target_employees(schedule).await?;
        let total_sections = self.content.sections(schedule.talk_id).await?.len() as i32;
        let due_date = due_date_for(occurrence, self.due_grace_days);
        let next = recurrence::following(
            schedule.frequency,
            schedule.start_date,
            schedule.end_date,
            occurrence,
        );

        let mut created = 0;
        let mut skipped = 0;
        let mut tx = self.db.pool.begin().await?;

        for employee_id in &employees {
            if ScheduledTalk::exists_for_occurrence(&mut *tx, schedule.id, *employee_id, occurrence)
                .await?
            {
                skipped += 1;
                continue;
            }

            let inserted = ScheduledTalk::insert_if_absent(
                &mut *tx,
                &NewScheduledTalk {
                    tenant_id: schedule.tenant_id,
                    talk_id: schedule.talk_id,
                    employee_id: *employee_id,
                    schedule_id: Some(schedule.id),
                    occurrence_date: Some(occurrence),
                    course_assignment_id: None,
                    due_date,
                    total_sections,
                },
            )
            .await?;

            match inserted {
                Some(_) => created += 1,
                None => skipped += 1,
            }
        }

        let advanced =
            ToolboxTalkSchedule::advance(&mut *tx, schedule.id, occurrence, next, now).await?;
        tx.commit().await?;

        info!(
            schedule_id = %schedule.id,
            %occurrence,
            created,
            skipped,
            next_run_date = ?advanced.next_run_date,
            "Expanded schedule occurrence"
        );

        Ok((created, skipped, advanced))
    }
}
