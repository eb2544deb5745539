use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        course::CourseTalk,
        course_assignment::{CourseAssignment, CourseAssignmentError, CourseAssignmentStatus},
        employee::{Employee, EmployeeError},
        scheduled_talk::{NewScheduledTalk, ScheduledTalk, ScheduledTalkError, ScheduledTalkStatus},
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use utils::pagination::{Page, PageParams};
use uuid::Uuid;

use super::{
    assignment_status::ScheduledTalkView,
    content::{ContentError, ContentStore},
    context::RequestContext,
};

#[derive(Debug, Error)]
pub enum CoursePlannerError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Employee(#[from] EmployeeError),
    #[error(transparent)]
    ScheduledTalk(#[from] ScheduledTalkError),
    #[error("{0}")]
    Validation(String),
    #[error("Course or course assignment not found")]
    NotFound,
    #[error("Course assignment is already {0}")]
    AlreadyTerminal(CourseAssignmentStatus),
}

impl From<CourseAssignmentError> for CoursePlannerError {
    fn from(err: CourseAssignmentError) -> Self {
        match err {
            CourseAssignmentError::Database(e) => CoursePlannerError::Database(e),
            CourseAssignmentError::NotFound => CoursePlannerError::NotFound,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct TalkPreview {
    pub talk_id: Uuid,
    pub title: String,
    pub order_index: i32,
    /// Completed through any assignment, inside or outside this course.
    pub already_completed: bool,
    /// An unfinished assignment for the talk already exists.
    pub already_assigned: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct EmployeePreview {
    pub employee_id: Uuid,
    pub full_name: String,
    pub existing_assignment_id: Option<Uuid>,
    pub talks: Vec<TalkPreview>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct CoursePreview {
    pub course_id: Uuid,
    pub course_title: String,
    pub employees: Vec<EmployeePreview>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct PreviewRequest {
    pub employee_ids: Vec<Uuid>,
}

/// Talks to include for one employee. `None` means every talk in the course.
#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct EmployeeInclusion {
    pub employee_id: Uuid,
    #[serde(default)]
    pub talk_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct AssignCourse {
    pub due_date: DateTime<Utc>,
    pub employees: Vec<EmployeeInclusion>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct EmployeeAssignResult {
    pub employee_id: Uuid,
    pub course_assignment_id: Uuid,
    pub created_assignment: bool,
    /// The employee had already finished this course; nothing was added.
    pub already_completed: bool,
    pub created_talks: usize,
    pub skipped_existing: usize,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct CourseAssignmentView {
    #[serde(flatten)]
    #[ts(flatten)]
    pub assignment: CourseAssignment,
    pub status: CourseAssignmentStatus,
    pub total_talks: usize,
    pub completed_talks: usize,
    pub talks: Vec<ScheduledTalkView>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
pub struct CourseAssignmentFilter {
    pub course_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
}

/// Aggregate status of a course assignment from its live members.
///
/// Cancelled members (removed talks) do not count. `Overdue` wins over
/// `InProgress` as soon as the course due date passes with work remaining.
pub fn aggregate_status(
    assignment: &CourseAssignment,
    members: &[ScheduledTalk],
    now: DateTime<Utc>,
) -> CourseAssignmentStatus {
    if assignment.cancelled_at.is_some() {
        return CourseAssignmentStatus::Cancelled;
    }

    let live: Vec<ScheduledTalkStatus> = members
        .iter()
        .map(|m| m.status_at(now))
        .filter(|s| *s != ScheduledTalkStatus::Cancelled)
        .collect();
    if live.is_empty() {
        return CourseAssignmentStatus::Assigned;
    }
    if live.iter().all(|s| *s == ScheduledTalkStatus::Completed) {
        return CourseAssignmentStatus::Completed;
    }
    if now > assignment.due_date || live.contains(&ScheduledTalkStatus::Overdue) {
        return CourseAssignmentStatus::Overdue;
    }
    if live
        .iter()
        .any(|s| matches!(s, ScheduledTalkStatus::InProgress | ScheduledTalkStatus::Completed))
    {
        return CourseAssignmentStatus::InProgress;
    }
    CourseAssignmentStatus::Assigned
}

/// Batches the talks of a course into one assignment unit per employee.
#[derive(Clone)]
pub struct CoursePlanner {
    db: DBService,
    content: Arc<dyn ContentStore>,
}

impl CoursePlanner {
    pub fn new(db: DBService, content: Arc<dyn ContentStore>) -> Self {
        Self { db, content }
    }

    async fn course_talks(
        &self,
        ctx: &RequestContext,
        course_id: Uuid,
    ) -> Result<(String, Vec<CourseTalk>), CoursePlannerError> {
        let course = self
            .content
            .course(ctx.tenant_id, course_id)
            .await?
            .ok_or(CoursePlannerError::NotFound)?;
        let talks = self.content.course_talks(course.id).await?;
        Ok((course.title, talks))
    }

    pub async fn preview(
        &self,
        ctx: &RequestContext,
        course_id: Uuid,
        employee_ids: &[Uuid],
    ) -> Result<CoursePreview, CoursePlannerError> {
        let (course_title, talks) = self.course_talks(ctx, course_id).await?;

        let mut employees = Vec::with_capacity(employee_ids.len());
        for employee_id in employee_ids {
            let employee = Employee::find_by_id(&self.db.pool, ctx.tenant_id, *employee_id)
                .await?
                .ok_or_else(|| CoursePlannerError::Validation(format!("unknown employee {employee_id}")))?;
            let existing = CourseAssignment::find_live(&self.db.pool, course_id, employee.id).await?;

            let mut previews = Vec::with_capacity(talks.len());
            for talk in &talks {
                previews.push(TalkPreview {
                    talk_id: talk.talk_id,
                    title: talk.title.clone(),
                    order_index: talk.order_index,
                    already_completed: ScheduledTalk::has_completed(
                        &self.db.pool,
                        ctx.tenant_id,
                        employee.id,
                        talk.talk_id,
                    )
                    .await?,
                    already_assigned: ScheduledTalk::has_open(
                        &self.db.pool,
                        ctx.tenant_id,
                        employee.id,
                        talk.talk_id,
                    )
                    .await?,
                });
            }

            employees.push(EmployeePreview {
                employee_id: employee.id,
                full_name: employee.full_name,
                existing_assignment_id: existing.map(|a| a.id),
                talks: previews,
            });
        }

        Ok(CoursePreview {
            course_id,
            course_title,
            employees,
        })
    }

    /// Creates (or extends) one course assignment per employee. Talks the
    /// employee already holds under the same assignment are not duplicated,
    /// and a completed course assignment is never reopened.
    pub async fn assign(
        &self,
        ctx: &RequestContext,
        course_id: Uuid,
        request: AssignCourse,
    ) -> Result<Vec<EmployeeAssignResult>, CoursePlannerError> {
        if request.employees.is_empty() {
            return Err(CoursePlannerError::Validation("no employees selected".to_string()));
        }
        let (_, talks) = self.course_talks(ctx, course_id).await?;
        if talks.is_empty() {
            return Err(CoursePlannerError::Validation("course has no talks".to_string()));
        }

        // Content lookups happen up front, outside any transaction.
        let mut section_counts = Vec::with_capacity(talks.len());
        for talk in &talks {
            section_counts.push((talk.talk_id, self.content.sections(talk.talk_id).await?.len() as i32));
        }

        let mut plans = Vec::with_capacity(request.employees.len());
        for inclusion in &request.employees {
            let employee = Employee::find_by_id(&self.db.pool, ctx.tenant_id, inclusion.employee_id)
                .await?
                .filter(|e| e.is_active)
                .ok_or_else(|| {
                    CoursePlannerError::Validation(format!(
                        "employee {} is unknown or inactive",
                        inclusion.employee_id
                    ))
                })?;
            let selected: Vec<(Uuid, i32)> = match &inclusion.talk_ids {
                None => section_counts.clone(),
                Some(ids) => {
                    if let Some(stray) = ids.iter().find(|id| !talks.iter().any(|t| t.talk_id == **id)) {
                        return Err(CoursePlannerError::Validation(format!(
                            "talk {stray} is not part of this course"
                        )));
                    }
                    section_counts
                        .iter()
                        .filter(|(talk_id, _)| ids.contains(talk_id))
                        .copied()
                        .collect()
                }
            };
            if selected.is_empty() {
                return Err(CoursePlannerError::Validation(format!(
                    "no talks selected for employee {}",
                    employee.id
                )));
            }
            plans.push((employee.id, selected));
        }

        let mut results = Vec::with_capacity(plans.len());
        for (employee_id, selected) in plans {
            if let Some(existing) = CourseAssignment::find_live(&self.db.pool, course_id, employee_id).await? {
                let members = ScheduledTalk::find_by_course_assignment(&self.db.pool, existing.id).await?;
                if aggregate_status(&existing, &members, ctx.now) == CourseAssignmentStatus::Completed {
                    info!(
                        course_id = %course_id,
                        employee_id = %employee_id,
                        course_assignment_id = %existing.id,
                        "Course already completed, leaving it untouched"
                    );
                    results.push(EmployeeAssignResult {
                        employee_id,
                        course_assignment_id: existing.id,
                        created_assignment: false,
                        already_completed: true,
                        created_talks: 0,
                        skipped_existing: 0,
                    });
                    continue;
                }
            }

            let mut tx = self.db.pool.begin().await?;
            let (assignment, created_assignment) = CourseAssignment::find_or_create(
                &mut tx,
                ctx.tenant_id,
                course_id,
                employee_id,
                request.due_date,
                ctx.user_id,
            )
            .await?;

            let mut created_talks = 0;
            let mut skipped_existing = 0;
            for (talk_id, total_sections) in selected {
                let inserted = ScheduledTalk::insert_if_absent(
                    &mut *tx,
                    &NewScheduledTalk {
                        tenant_id: ctx.tenant_id,
                        talk_id,
                        employee_id,
                        schedule_id: None,
                        occurrence_date: None,
                        course_assignment_id: Some(assignment.id),
                        due_date: assignment.due_date,
                        total_sections,
                    },
                )
                .await?;
                match inserted {
                    Some(_) => created_talks += 1,
                    None => skipped_existing += 1,
                }
            }
            tx.commit().await?;

            info!(
                course_id = %course_id,
                employee_id = %employee_id,
                course_assignment_id = %assignment.id,
                created_talks,
                skipped_existing,
                "Assigned course"
            );
            results.push(EmployeeAssignResult {
                employee_id,
                course_assignment_id: assignment.id,
                created_assignment,
                already_completed: false,
                created_talks,
                skipped_existing,
            });
        }

        Ok(results)
    }

    async fn view(
        &self,
        assignment: CourseAssignment,
        now: DateTime<Utc>,
    ) -> Result<CourseAssignmentView, CoursePlannerError> {
        let members = ScheduledTalk::find_by_course_assignment(&self.db.pool, assignment.id).await?;
        let status = aggregate_status(&assignment, &members, now);
        let live: Vec<&ScheduledTalk> = members.iter().filter(|m| m.cancelled_at.is_none()).collect();
        let completed_talks = live.iter().filter(|m| m.completed_at.is_some()).count();
        Ok(CourseAssignmentView {
            total_talks: live.len(),
            completed_talks,
            status,
            assignment,
            talks: members.into_iter().map(|m| ScheduledTalkView::at(m, now)).collect(),
        })
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<CourseAssignmentView, CoursePlannerError> {
        let assignment = CourseAssignment::find_by_id(&self.db.pool, ctx.tenant_id, id)
            .await?
            .ok_or(CoursePlannerError::NotFound)?;
        self.view(assignment, ctx.now).await
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &CourseAssignmentFilter,
        page: PageParams,
    ) -> Result<Page<CourseAssignmentView>, CoursePlannerError> {
        let (assignments, total) = CourseAssignment::list(
            &self.db.pool,
            ctx.tenant_id,
            filter.course_id,
            filter.employee_id,
            page.limit(),
            page.offset(),
        )
        .await?;

        let mut views = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            views.push(self.view(assignment, ctx.now).await?);
        }
        Ok(Page::new(views, page, total))
    }

    /// Cancels the assignment and every member not yet completed. Completed
    /// members stay as they are.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<CourseAssignmentView, CoursePlannerError> {
        let current = self.get(ctx, id).await?;
        if current.status == CourseAssignmentStatus::Cancelled {
            return Err(CoursePlannerError::AlreadyTerminal(current.status));
        }
        let to_cancel: Vec<Uuid> = current
            .talks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.scheduled_talk.id)
            .collect();

        let mut tx = self.db.pool.begin().await?;
        for member_id in &to_cancel {
            ScheduledTalk::cancel(&mut tx, *member_id, reason, ctx.now).await?;
        }
        let cancelled = CourseAssignment::mark_cancelled(&mut *tx, id, reason, ctx.now).await?;
        tx.commit().await?;

        info!(
            course_assignment_id = %id,
            cancelled_talks = to_cancel.len(),
            preserved = current.completed_talks,
            "Cancelled course assignment"
        );
        self.view(cancelled, ctx.now).await
    }

    /// Drops one talk from a live course assignment by cancelling its member.
    pub async fn remove_talk(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        talk_id: Uuid,
    ) -> Result<CourseAssignmentView, CoursePlannerError> {
        let current = self.get(ctx, id).await?;
        if matches!(
            current.status,
            CourseAssignmentStatus::Completed | CourseAssignmentStatus::Cancelled
        ) {
            return Err(CoursePlannerError::AlreadyTerminal(current.status));
        }
        let member = current
            .talks
            .iter()
            .find(|t| t.scheduled_talk.talk_id == talk_id && t.status != ScheduledTalkStatus::Cancelled)
            .ok_or(CoursePlannerError::NotFound)?;
        if member.status == ScheduledTalkStatus::Completed {
            return Err(CoursePlannerError::Validation(
                "completed talks cannot be removed".to_string(),
            ));
        }

        let mut conn = self.db.pool.acquire().await?;
        ScheduledTalk::cancel(
            &mut conn,
            member.scheduled_talk.id,
            Some("removed from course assignment"),
            ctx.now,
        )
        .await?;
        drop(conn);

        let view = self.get(ctx, id).await?;
        if view.total_talks == 0 {
            warn!(course_assignment_id = %id, "Course assignment has no remaining talks");
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{TalkFixture, content_store, seed_employee, seed_talk, setup_db};
    use chrono::Duration;
    use db::models::{completion::CompletionRecord, course::ToolboxTalkCourse};

    struct Setup {
        db: DBService,
        planner: CoursePlanner,
        ctx: RequestContext,
        course_id: Uuid,
        talk_ids: Vec<Uuid>,
    }

    async fn setup(talks: usize) -> Setup {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let mut talk_ids = Vec::new();
        for _ in 0..talks {
            talk_ids.push(seed_talk(&db, tenant_id, TalkFixture::default()).await.id);
        }
        let course = ToolboxTalkCourse::create(&db.pool, tenant_id, "Site induction", None, &talk_ids)
            .await
            .unwrap();
        Setup {
            planner: CoursePlanner::new(db.clone(), content_store(&db)),
            ctx: RequestContext::admin(tenant_id, Some(Uuid::new_v4())),
            db,
            course_id: course.id,
            talk_ids,
        }
    }

    fn everything(employee_id: Uuid, due_date: DateTime<Utc>) -> AssignCourse {
        AssignCourse {
            due_date,
            employees: vec![EmployeeInclusion {
                employee_id,
                talk_ids: None,
            }],
        }
    }

    async fn complete(db: &DBService, row: &ScheduledTalk) {
        let mut conn = db.pool.acquire().await.unwrap();
        let completed_at = Utc::now();
        ScheduledTalk::mark_completed(&mut conn, row.id, row.version, completed_at)
            .await
            .unwrap();
        CompletionRecord::insert(
            &mut *conn,
            &CompletionRecord {
                scheduled_talk_id: row.id,
                signed_by_name: "Site Lead".to_string(),
                signature_data: "data:image/png;base64,AAAA".to_string(),
                completed_at,
                latitude: None,
                longitude: None,
                certificate_reference: None,
                quiz_score: Some(100),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn reassigning_does_not_duplicate_members() {
        let s = setup(3).await;
        let employee = seed_employee(&s.db, s.ctx.tenant_id, "Kim").await;
        let due = s.ctx.now + Duration::days(14);

        let first = s
            .planner
            .assign(
                &s.ctx,
                s.course_id,
                AssignCourse {
                    due_date: due,
                    employees: vec![EmployeeInclusion {
                        employee_id: employee.id,
                        talk_ids: Some(vec![s.talk_ids[0], s.talk_ids[2]]),
                    }],
                },
            )
            .await
            .unwrap();
        assert!(first[0].created_assignment);
        assert_eq!(first[0].created_talks, 2);

        let second = s.planner.assign(&s.ctx, s.course_id, everything(employee.id, due)).await.unwrap();
        assert!(!second[0].created_assignment);
        assert_eq!(second[0].course_assignment_id, first[0].course_assignment_id);
        assert_eq!(second[0].created_talks, 1);
        assert_eq!(second[0].skipped_existing, 2);

        let view = s.planner.get(&s.ctx, first[0].course_assignment_id).await.unwrap();
        assert_eq!(view.total_talks, 3);
        assert_eq!(view.status, CourseAssignmentStatus::Assigned);
        assert_eq!(
            view.talks.iter().map(|t| t.scheduled_talk.talk_id).collect::<Vec<_>>(),
            s.talk_ids
        );
    }

    #[tokio::test]
    async fn preview_flags_completed_and_open_talks() {
        let s = setup(2).await;
        let employee = seed_employee(&s.db, s.ctx.tenant_id, "Lou").await;

        // Completed outside the course.
        let standalone = ScheduledTalk::insert_if_absent(
            &s.db.pool,
            &NewScheduledTalk {
                tenant_id: s.ctx.tenant_id,
                talk_id: s.talk_ids[0],
                employee_id: employee.id,
                schedule_id: None,
                occurrence_date: None,
                course_assignment_id: None,
                due_date: s.ctx.now + Duration::days(3),
                total_sections: 2,
            },
        )
        .await
        .unwrap()
        .unwrap();
        complete(&s.db, &standalone).await;

        let preview = s.planner.preview(&s.ctx, s.course_id, &[employee.id]).await.unwrap();
        let talks = &preview.employees[0].talks;
        assert_eq!(preview.course_title, "Site induction");
        assert!(talks[0].already_completed);
        assert!(!talks[1].already_completed);
        assert!(!talks[1].already_assigned);
        assert!(preview.employees[0].existing_assignment_id.is_none());

        assert!(matches!(
            s.planner.preview(&s.ctx, Uuid::new_v4(), &[employee.id]).await,
            Err(CoursePlannerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_cancels_started_member_and_keeps_completed_ones() {
        let s = setup(3).await;
        let employee = seed_employee(&s.db, s.ctx.tenant_id, "Max").await;
        let result = s
            .planner
            .assign(&s.ctx, s.course_id, everything(employee.id, s.ctx.now + Duration::days(7)))
            .await
            .unwrap();
        let id = result[0].course_assignment_id;

        let members = ScheduledTalk::find_by_course_assignment(&s.db.pool, id).await.unwrap();
        complete(&s.db, &members[0]).await;
        complete(&s.db, &members[1]).await;
        {
            let mut conn = s.db.pool.acquire().await.unwrap();
            let started = ScheduledTalk::mark_started(&mut conn, members[2].id, members[2].version, Utc::now(), None, None)
                .await
                .unwrap();
            ScheduledTalk::raise_video_percent(&mut conn, started.id, started.version, 45, Utc::now())
                .await
                .unwrap();
        }

        let progress = s.planner.get(&s.ctx, id).await.unwrap();
        assert_eq!(progress.status, CourseAssignmentStatus::InProgress);
        assert_eq!(progress.completed_talks, 2);
        assert_eq!(progress.talks[2].status, ScheduledTalkStatus::InProgress);

        let deleted = s.planner.delete(&s.ctx, id, Some("course retired")).await.unwrap();
        assert_eq!(deleted.status, CourseAssignmentStatus::Cancelled);
        let statuses: Vec<ScheduledTalkStatus> = deleted.talks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                ScheduledTalkStatus::Completed,
                ScheduledTalkStatus::Completed,
                ScheduledTalkStatus::Cancelled
            ]
        );
        let cancelled = &deleted.talks[2].scheduled_talk;
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("course retired"));
        assert!(cancelled.started_at.is_some());

        for member in &members[..2] {
            let record = CompletionRecord::find(&s.db.pool, member.id).await.unwrap().unwrap();
            assert_eq!(record.signed_by_name, "Site Lead");
            let row = ScheduledTalk::find_by_course_assignment(&s.db.pool, id)
                .await
                .unwrap()
                .into_iter()
                .find(|m| m.id == member.id)
                .unwrap();
            assert!(row.completed_at.is_some());
            assert!(row.cancelled_at.is_none());
        }
        assert!(CompletionRecord::find(&s.db.pool, members[2].id).await.unwrap().is_none());

        assert!(matches!(
            s.planner.delete(&s.ctx, id, None).await,
            Err(CoursePlannerError::AlreadyTerminal(CourseAssignmentStatus::Cancelled))
        ));
    }

    #[tokio::test]
    async fn reassigning_a_completed_course_adds_nothing() {
        let s = setup(2).await;
        let employee = seed_employee(&s.db, s.ctx.tenant_id, "Pat").await;
        let due = s.ctx.now + Duration::days(7);
        let first = s.planner.assign(&s.ctx, s.course_id, everything(employee.id, due)).await.unwrap();
        let id = first[0].course_assignment_id;
        for member in ScheduledTalk::find_by_course_assignment(&s.db.pool, id).await.unwrap() {
            complete(&s.db, &member).await;
        }
        assert_eq!(
            s.planner.get(&s.ctx, id).await.unwrap().status,
            CourseAssignmentStatus::Completed
        );

        // The course grows after the employee finished it.
        let extra = seed_talk(&s.db, s.ctx.tenant_id, TalkFixture::default()).await;
        sqlx::query("INSERT INTO toolbox_talk_course_items (course_id, talk_id, order_index) VALUES (?1, ?2, 2)")
            .bind(s.course_id)
            .bind(extra.id)
            .execute(&s.db.pool)
            .await
            .unwrap();

        let second = s.planner.assign(&s.ctx, s.course_id, everything(employee.id, due)).await.unwrap();
        assert!(second[0].already_completed);
        assert!(!second[0].created_assignment);
        assert_eq!(second[0].course_assignment_id, id);
        assert_eq!(second[0].created_talks, 0);

        let view = s.planner.get(&s.ctx, id).await.unwrap();
        assert_eq!(view.status, CourseAssignmentStatus::Completed);
        assert_eq!(view.total_talks, 2);
        assert!(view.talks.iter().all(|t| t.scheduled_talk.talk_id != extra.id));
    }

    #[tokio::test]
    async fn removing_remaining_talk_completes_the_course() {
        let s = setup(2).await;
        let employee = seed_employee(&s.db, s.ctx.tenant_id, "Ned").await;
        let result = s
            .planner
            .assign(&s.ctx, s.course_id, everything(employee.id, s.ctx.now + Duration::days(7)))
            .await
            .unwrap();
        let id = result[0].course_assignment_id;
        let members = ScheduledTalk::find_by_course_assignment(&s.db.pool, id).await.unwrap();
        complete(&s.db, &members[0]).await;

        assert!(matches!(
            s.planner.remove_talk(&s.ctx, id, s.talk_ids[0]).await,
            Err(CoursePlannerError::Validation(_))
        ));

        let view = s.planner.remove_talk(&s.ctx, id, s.talk_ids[1]).await.unwrap();
        assert_eq!(view.total_talks, 1);
        assert_eq!(view.status, CourseAssignmentStatus::Completed);
    }

    #[tokio::test]
    async fn overdue_once_course_due_date_passes() {
        let s = setup(2).await;
        let employee = seed_employee(&s.db, s.ctx.tenant_id, "Oli").await;
        let result = s
            .planner
            .assign(&s.ctx, s.course_id, everything(employee.id, s.ctx.now - Duration::hours(1)))
            .await
            .unwrap();
        let id = result[0].course_assignment_id;
        let members = ScheduledTalk::find_by_course_assignment(&s.db.pool, id).await.unwrap();
        complete(&s.db, &members[0]).await;

        let view = s.planner.get(&s.ctx, id).await.unwrap();
        assert_eq!(view.status, CourseAssignmentStatus::Overdue);

        let page = s
            .planner
            .list(
                &s.ctx,
                &CourseAssignmentFilter {
                    employee_id: Some(employee.id),
                    ..Default::default()
                },
                PageParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].status, CourseAssignmentStatus::Overdue);
    }
}
