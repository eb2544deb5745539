use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        completion::{CompletionError, CompletionRecord},
        quiz_attempt::{AnswerValue, NewQuizAttempt, QuizAttempt, QuizAttemptError},
        scheduled_talk::{ScheduledTalk, ScheduledTalkError, ScheduledTalkStatus},
        section_progress::{SectionProgress, SectionProgressError},
        toolbox_talk::{QuestionType, ToolboxTalk, ToolboxTalkQuestion, ToolboxTalkSection},
        translation::ToolboxTalkTranslation,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use uuid::Uuid;

use super::{
    assignment_status::ScheduledTalkView,
    content::{ContentError, ContentStore},
    context::RequestContext,
    quiz_grading::{self, GradableQuestion, QuizResult},
};

/// Steps of the completion workflow, in the order they must be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum WorkflowStep {
    Video,
    Sections,
    Quiz,
    Signature,
    Complete,
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStep::Video => write!(f, "Video"),
            WorkflowStep::Sections => write!(f, "Sections"),
            WorkflowStep::Quiz => write!(f, "Quiz"),
            WorkflowStep::Signature => write!(f, "Signature"),
            WorkflowStep::Complete => write!(f, "Complete"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    SectionProgress(#[from] SectionProgressError),
    #[error(transparent)]
    QuizAttempt(#[from] QuizAttemptError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("{0}")]
    Validation(String),
    #[error("Gate not satisfied: {0}")]
    GateNotSatisfied(WorkflowStep),
    #[error("Scheduled talk was modified concurrently (expected version {expected})")]
    Conflict { expected: i64 },
    #[error("Scheduled talk not found")]
    NotFound,
    #[error("Scheduled talk is already {0}")]
    AlreadyTerminal(ScheduledTalkStatus),
}

impl From<ScheduledTalkError> for WorkflowError {
    fn from(err: ScheduledTalkError) -> Self {
        match err {
            ScheduledTalkError::Database(e) => WorkflowError::Database(e),
            ScheduledTalkError::NotFound => WorkflowError::NotFound,
            ScheduledTalkError::VersionConflict { expected } => WorkflowError::Conflict { expected },
            ScheduledTalkError::AlreadyTerminal(status) => WorkflowError::AlreadyTerminal(status),
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct StartRequest {
    pub expected_version: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct SectionAckRequest {
    pub expected_version: i64,
    #[serde(default = "default_true")]
    pub acknowledged: bool,
    #[serde(default)]
    pub time_spent_seconds: i32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct VideoProgressRequest {
    pub expected_version: i64,
    pub watch_percent: i32,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct VersionedRequest {
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct QuizSubmission {
    pub expected_version: i64,
    #[ts(type = "Record<string, AnswerValue>")]
    pub answers: BTreeMap<Uuid, AnswerValue>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CompletionRequest {
    pub expected_version: i64,
    pub signed_by_name: String,
    /// Captured signature artifact, typically a data URL.
    pub signature_data: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct QuizSubmissionResult {
    pub attempt_number: i32,
    pub result: QuizResult,
    pub scheduled_talk: ScheduledTalkView,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct TalkSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub language: String,
    pub video_url: Option<String>,
    pub minimum_video_watch_percent: i32,
    pub passing_score: Option<i32>,
    pub max_quiz_attempts: Option<i32>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct SectionView {
    pub id: Uuid,
    pub section_number: i32,
    pub title: String,
    pub content: String,
    pub requires_acknowledgment: bool,
    pub read: bool,
    pub acknowledged: bool,
}

/// A displayable option. Answers refer to `original_index`, whatever order
/// the client renders options in.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct OptionView {
    pub original_index: i32,
    pub text: String,
}

/// Question as sent to employees. Carries no answer key.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct QuestionView {
    pub id: Uuid,
    pub question_number: i32,
    pub question_text: String,
    pub question_type: QuestionType,
    pub points: i32,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct AssignmentDetail {
    pub assignment: ScheduledTalkView,
    pub talk: TalkSummary,
    pub sections: Vec<SectionView>,
    pub quiz_locked: bool,
    pub questions: Vec<QuestionView>,
    pub current_step: WorkflowStep,
    pub completion: Option<CompletionRecord>,
}

/// Everything the gates look at for one assignment.
struct WorkflowState {
    row: ScheduledTalk,
    talk: ToolboxTalk,
    sections: Vec<ToolboxTalkSection>,
    questions: Vec<ToolboxTalkQuestion>,
}

impl WorkflowState {
    fn video_satisfied(&self) -> bool {
        !self.talk.has_video() || self.row.video_watch_percent >= self.talk.minimum_video_watch_percent
    }

    fn sections_satisfied(&self) -> bool {
        self.row.completed_sections as usize >= self.sections.len()
    }

    fn quiz_satisfied(&self) -> bool {
        self.questions.is_empty() || self.row.last_quiz_passed == Some(true)
    }

    /// First gate not yet satisfied, checked in workflow order.
    fn first_unmet_gate(&self) -> Option<WorkflowStep> {
        if !self.video_satisfied() {
            Some(WorkflowStep::Video)
        } else if !self.sections_satisfied() {
            Some(WorkflowStep::Sections)
        } else if !self.quiz_satisfied() {
            Some(WorkflowStep::Quiz)
        } else {
            None
        }
    }

    fn current_step(&self) -> WorkflowStep {
        if self.row.terminal_status().is_some() {
            return WorkflowStep::Complete;
        }
        self.first_unmet_gate().unwrap_or(WorkflowStep::Signature)
    }
}

/// `TT-<YYYYMMDD>-<first 8 hex digits of the scheduled talk id>`.
pub fn certificate_reference(scheduled_talk_id: Uuid, completed_at: DateTime<Utc>) -> String {
    let id = scheduled_talk_id.simple().to_string();
    format!("TT-{}-{}", completed_at.format("%Y%m%d"), &id[..8]).to_uppercase()
}

/// The gated video → sections → quiz → signature sequence an employee walks
/// through for one scheduled talk.
///
/// Every mutation carries the version the client last saw; a stale version
/// is a conflict, never a silent overwrite.
#[derive(Clone)]
pub struct CompletionWorkflow {
    db: DBService,
    content: Arc<dyn ContentStore>,
}

impl CompletionWorkflow {
    pub fn new(db: DBService, content: Arc<dyn ContentStore>) -> Self {
        Self { db, content }
    }

    async fn load_owned(&self, ctx: &RequestContext, id: Uuid) -> Result<ScheduledTalk, WorkflowError> {
        let employee_id = ctx
            .employee_id
            .ok_or_else(|| WorkflowError::Validation("employee context required".to_string()))?;
        ScheduledTalk::find_by_id(&self.db.pool, ctx.tenant_id, id)
            .await?
            .filter(|row| row.employee_id == employee_id)
            .ok_or(WorkflowError::NotFound)
    }

    async fn load_state(&self, ctx: &RequestContext, id: Uuid) -> Result<WorkflowState, WorkflowError> {
        let row = self.load_owned(ctx, id).await?;
        let talk = self
            .content
            .talk(ctx.tenant_id, row.talk_id)
            .await?
            .ok_or(WorkflowError::NotFound)?;
        let sections = self.content.sections(talk.id).await?;
        let questions = self.content.questions(talk.id).await?;
        Ok(WorkflowState {
            row,
            talk,
            sections,
            questions,
        })
    }

    /// Loads the state for a mutation: the row must be live and at the
    /// version the caller expects.
    async fn load_for_update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        expected_version: i64,
    ) -> Result<WorkflowState, WorkflowError> {
        let state = self.load_state(ctx, id).await?;
        if let Some(status) = state.row.terminal_status() {
            return Err(WorkflowError::AlreadyTerminal(status));
        }
        if state.row.version != expected_version {
            return Err(WorkflowError::Conflict {
                expected: expected_version,
            });
        }
        Ok(state)
    }

    pub async fn detail(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        language: Option<&str>,
    ) -> Result<AssignmentDetail, WorkflowError> {
        let state = self.load_state(ctx, id).await?;
        let progress = SectionProgress::find_by_scheduled_talk(&self.db.pool, id).await?;
        let completion = CompletionRecord::find(&self.db.pool, id).await?;

        let translation = match language {
            Some(lang) if lang != state.talk.source_language => {
                self.content.translation(state.talk.id, lang).await?
            }
            _ => None,
        };

        let talk = TalkSummary {
            id: state.talk.id,
            title: translation
                .as_ref()
                .map(|t| t.title.clone())
                .unwrap_or_else(|| state.talk.title.clone()),
            description: translation
                .as_ref()
                .map(|t| t.description.clone())
                .unwrap_or_else(|| state.talk.description.clone()),
            language: translation
                .as_ref()
                .map(|t| t.language_code.clone())
                .unwrap_or_else(|| state.talk.source_language.clone()),
            video_url: state.talk.video_url.clone(),
            minimum_video_watch_percent: state.talk.minimum_video_watch_percent,
            passing_score: state.talk.passing_score,
            max_quiz_attempts: state.talk.max_quiz_attempts,
        };

        let sections = state
            .sections
            .iter()
            .map(|section| {
                let record = progress.iter().find(|p| p.section_id == section.id);
                let (title, content) = translated_section(translation.as_ref(), section);
                SectionView {
                    id: section.id,
                    section_number: section.section_number,
                    title,
                    content,
                    requires_acknowledgment: section.requires_acknowledgment,
                    read: record.is_some(),
                    acknowledged: record.is_some_and(|p| p.acknowledged),
                }
            })
            .collect();

        // Questions stay hidden until every gate before the quiz is met.
        let quiz_locked = !(state.video_satisfied() && state.sections_satisfied());
        let questions = if quiz_locked {
            Vec::new()
        } else {
            state
                .questions
                .iter()
                .map(|q| question_view(translation.as_ref(), q))
                .collect()
        };

        Ok(AssignmentDetail {
            current_step: state.current_step(),
            assignment: ScheduledTalkView::at(state.row, ctx.now),
            talk,
            sections,
            quiz_locked,
            questions,
            completion,
        })
    }

    pub async fn start(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        request: StartRequest,
    ) -> Result<ScheduledTalkView, WorkflowError> {
        validate_location(request.latitude, request.longitude)?;
        let state = self.load_for_update(ctx, id, request.expected_version).await?;

        let mut conn = self.db.pool.acquire().await?;
        let updated = ScheduledTalk::mark_started(
            &mut conn,
            state.row.id,
            request.expected_version,
            ctx.now,
            request.latitude,
            request.longitude,
        )
        .await?;

        info!(scheduled_talk_id = %id, "Employee started toolbox talk");
        Ok(ScheduledTalkView::at(updated, ctx.now))
    }

    /// Records the first read of a section. Re-reading is a no-op.
    pub async fn acknowledge_section(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        section_id: Uuid,
        request: SectionAckRequest,
    ) -> Result<ScheduledTalkView, WorkflowError> {
        let state = self.load_state(ctx, id).await?;
        if let Some(status) = state.row.terminal_status() {
            return Err(WorkflowError::AlreadyTerminal(status));
        }
        let section = state
            .sections
            .iter()
            .find(|s| s.id == section_id)
            .ok_or_else(|| WorkflowError::Validation(format!("section {section_id} is not part of this talk")))?;
        if section.requires_acknowledgment && !request.acknowledged {
            return Err(WorkflowError::Validation(
                "this section must be acknowledged".to_string(),
            ));
        }

        let already_read = SectionProgress::find_by_scheduled_talk(&self.db.pool, id)
            .await?
            .iter()
            .any(|p| p.section_id == section_id);
        if already_read {
            return Ok(ScheduledTalkView::at(state.row, ctx.now));
        }
        if state.row.version != request.expected_version {
            return Err(WorkflowError::Conflict {
                expected: request.expected_version,
            });
        }

        let mut tx = self.db.pool.begin().await?;
        let inserted = SectionProgress::record_once(
            &mut *tx,
            id,
            section_id,
            request.acknowledged,
            request.time_spent_seconds,
            ctx.now,
        )
        .await?;
        if !inserted {
            // Lost a race with an identical acknowledgment.
            tx.rollback().await?;
            let row = self.load_owned(ctx, id).await?;
            return Ok(ScheduledTalkView::at(row, ctx.now));
        }

        let section_ids: Vec<Uuid> = state.sections.iter().map(|s| s.id).collect();
        let read = SectionProgress::find_by_scheduled_talk(&mut *tx, id)
            .await?
            .iter()
            .filter(|p| section_ids.contains(&p.section_id))
            .count() as i32;
        let updated =
            ScheduledTalk::set_completed_sections(&mut tx, id, request.expected_version, read, ctx.now)
                .await?;
        tx.commit().await?;

        info!(
            scheduled_talk_id = %id,
            section_id = %section_id,
            completed_sections = updated.completed_sections,
            "Section acknowledged"
        );
        Ok(ScheduledTalkView::at(updated, ctx.now))
    }

    /// Raises watch progress. Values below the stored percentage are ignored.
    pub async fn update_video_progress(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        request: VideoProgressRequest,
    ) -> Result<ScheduledTalkView, WorkflowError> {
        if !(0..=100).contains(&request.watch_percent) {
            return Err(WorkflowError::Validation(
                "watch_percent must be between 0 and 100".to_string(),
            ));
        }
        let state = self.load_for_update(ctx, id, request.expected_version).await?;
        if !state.talk.has_video() {
            return Err(WorkflowError::Validation("this talk has no video".to_string()));
        }
        if request.watch_percent <= state.row.video_watch_percent {
            return Ok(ScheduledTalkView::at(state.row, ctx.now));
        }

        let mut conn = self.db.pool.acquire().await?;
        let updated = ScheduledTalk::raise_video_percent(
            &mut conn,
            id,
            request.expected_version,
            request.watch_percent,
            ctx.now,
        )
        .await?;
        Ok(ScheduledTalkView::at(updated, ctx.now))
    }

    /// Zeroes watch progress so the video gate has to be met again.
    pub async fn reset_video(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        request: VersionedRequest,
    ) -> Result<ScheduledTalkView, WorkflowError> {
        let state = self.load_for_update(ctx, id, request.expected_version).await?;
        if !state.talk.has_video() {
            return Err(WorkflowError::Validation("this talk has no video".to_string()));
        }

        let mut conn = self.db.pool.acquire().await?;
        let updated =
            ScheduledTalk::reset_video_percent(&mut conn, id, request.expected_version, ctx.now).await?;

        info!(scheduled_talk_id = %id, "Video progress reset for rewatch");
        Ok(ScheduledTalkView::at(updated, ctx.now))
    }

    pub async fn submit_quiz(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        submission: QuizSubmission,
    ) -> Result<QuizSubmissionResult, WorkflowError> {
        let state = self.load_for_update(ctx, id, submission.expected_version).await?;
        if state.questions.is_empty() {
            return Err(WorkflowError::Validation("this talk has no quiz".to_string()));
        }
        match state.first_unmet_gate() {
            Some(step) if step < WorkflowStep::Quiz => return Err(WorkflowError::GateNotSatisfied(step)),
            _ => {}
        }
        if state.row.last_quiz_passed == Some(true) {
            return Err(WorkflowError::Validation("quiz already passed".to_string()));
        }
        if let Some(max) = state.talk.max_quiz_attempts
            && state.row.quiz_attempt_count >= max
        {
            return Err(WorkflowError::Validation(format!(
                "maximum of {max} quiz attempts reached"
            )));
        }

        let gradable = state
            .questions
            .iter()
            .map(GradableQuestion::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WorkflowError::Validation(e.to_string()))?;
        let result = quiz_grading::grade(&gradable, &submission.answers, state.talk.passing_score)
            .map_err(|e| WorkflowError::Validation(e.to_string()))?;

        let mut tx = self.db.pool.begin().await?;
        let updated = ScheduledTalk::record_quiz_result(
            &mut tx,
            id,
            submission.expected_version,
            result.percentage,
            result.passed,
            ctx.now,
        )
        .await?;
        let attempt = QuizAttempt::append(
            &mut *tx,
            NewQuizAttempt {
                scheduled_talk_id: id,
                attempt_number: updated.quiz_attempt_count,
                answers: submission.answers,
                results: result.results.clone(),
                score: result.score,
                max_score: result.max_score,
                percentage: result.percentage,
                passed: result.passed,
                submitted_at: ctx.now,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            scheduled_talk_id = %id,
            attempt = attempt.attempt_number,
            percentage = result.percentage,
            passed = result.passed,
            "Quiz graded"
        );

        Ok(QuizSubmissionResult {
            attempt_number: attempt.attempt_number,
            result,
            scheduled_talk: ScheduledTalkView::at(updated, ctx.now),
        })
    }

    /// Signature capture. The only transition into `Completed`.
    pub async fn complete(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        request: CompletionRequest,
    ) -> Result<CompletionRecord, WorkflowError> {
        let signed_by_name = request.signed_by_name.trim().to_string();
        if signed_by_name.is_empty() {
            return Err(WorkflowError::Validation("signed_by_name must not be empty".to_string()));
        }
        if request.signature_data.trim().is_empty() {
            return Err(WorkflowError::Validation("signature_data must not be empty".to_string()));
        }
        validate_location(request.latitude, request.longitude)?;

        let state = self.load_for_update(ctx, id, request.expected_version).await?;
        if let Some(step) = state.first_unmet_gate() {
            return Err(WorkflowError::GateNotSatisfied(step));
        }

        let certificate = state
            .talk
            .generate_certificate
            .then(|| certificate_reference(id, ctx.now));

        let mut tx = self.db.pool.begin().await?;
        let completed =
            ScheduledTalk::mark_completed(&mut tx, id, request.expected_version, ctx.now).await?;
        let record = CompletionRecord::insert(
            &mut *tx,
            &CompletionRecord {
                scheduled_talk_id: id,
                signed_by_name,
                signature_data: request.signature_data,
                completed_at: ctx.now,
                latitude: request.latitude,
                longitude: request.longitude,
                certificate_reference: certificate,
                quiz_score: completed.last_quiz_score,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            scheduled_talk_id = %id,
            employee_id = %completed.employee_id,
            certificate = record.certificate_reference.as_deref().unwrap_or("-"),
            "Toolbox talk completed"
        );
        Ok(record)
    }
}

fn validate_location(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), WorkflowError> {
    if latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat))
        || longitude.is_some_and(|lng| !(-180.0..=180.0).contains(&lng))
    {
        return Err(WorkflowError::Validation("coordinates out of range".to_string()));
    }
    Ok(())
}

fn translated_section(
    translation: Option<&ToolboxTalkTranslation>,
    section: &ToolboxTalkSection,
) -> (String, String) {
    translation
        .and_then(|t| t.sections.0.iter().find(|s| s.section_id == section.id))
        .map(|s| (s.title.clone(), s.content.clone()))
        .unwrap_or_else(|| (section.title.clone(), section.content.clone()))
}

fn question_view(translation: Option<&ToolboxTalkTranslation>, question: &ToolboxTalkQuestion) -> QuestionView {
    let translated = translation
        .and_then(|t| t.questions.0.iter().find(|q| q.question_id == question.id))
        .filter(|q| q.options.len() == question.options.0.len());

    let question_text = translated
        .map(|q| q.question_text.clone())
        .unwrap_or_else(|| question.question_text.clone());
    let texts = translated
        .map(|q| q.options.clone())
        .unwrap_or_else(|| question.options.0.clone());

    QuestionView {
        id: question.id,
        question_number: question.question_number,
        question_text,
        question_type: question.question_type,
        points: question.points,
        options: texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| OptionView {
                original_index: index as i32,
                text,
            })
            .collect(),
    }
}
