//! Per-language translation and subtitle jobs for toolbox talks.
//!
//! A job runs off the request path on a spawned worker. Languages are
//! processed with bounded parallelism; steps within one language run in
//! order. Cancellation is cooperative and observed before each language
//! starts, never mid-language.

pub mod providers;

use std::{collections::BTreeSet, fmt::Display, future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use db::{
    DBService,
    models::{
        localization_job::{
            CreateLocalizationJob, LanguageStatus, LocalizationJob, LocalizationJobError,
            LocalizationJobLanguage, LocalizationJobStatus, LocalizationStep,
        },
        toolbox_talk::{ToolboxTalkQuestion, ToolboxTalkSection},
        translation::{TranslatedQuestion, TranslatedSection, UpsertTranslation},
    },
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use ts_rs::TS;
use utils::pagination::{Page, PageParams};
use uuid::Uuid;

use self::providers::{
    HttpTranscriptionProvider, HttpTranslationProvider, SubtitleTrack, TranscriptionProvider,
    TranslationProvider,
};
use super::{
    config::LocalizationConfig,
    content::{ContentError, ContentStore},
    context::RequestContext,
};

#[derive(Debug, Error)]
pub enum LocalizationError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("{0}")]
    Validation(String),
    #[error("Localization job or talk not found")]
    NotFound,
    #[error("Talk already has an active localization job")]
    ActiveJobExists,
    #[error("Localization job is still running")]
    JobActive,
    #[error("Localization job is already {0}")]
    AlreadyTerminal(LocalizationJobStatus),
    #[error("{0} provider is not configured")]
    NotConfigured(&'static str),
    #[error("{0}")]
    TimedOut(String),
}

impl From<LocalizationJobError> for LocalizationError {
    fn from(err: LocalizationJobError) -> Self {
        match err {
            LocalizationJobError::Database(e) => LocalizationError::Database(e),
            LocalizationJobError::NotFound => LocalizationError::NotFound,
            LocalizationJobError::ActiveJobExists => LocalizationError::ActiveJobExists,
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct StartLocalization {
    pub languages: Vec<String>,
    #[serde(default = "default_true")]
    pub translate_content: bool,
    #[serde(default)]
    pub generate_subtitles: bool,
}

fn default_true() -> bool {
    true
}

/// Point-in-time view of a job, as polled or pushed to subscribers.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct LocalizationProgress {
    pub job: LocalizationJob,
    pub languages: Vec<LocalizationJobLanguage>,
    pub overall_percent: i32,
}

impl LocalizationProgress {
    fn new(job: LocalizationJob, languages: Vec<LocalizationJobLanguage>) -> Self {
        let overall_percent = if languages.is_empty() {
            0
        } else {
            languages.iter().map(|l| l.progress_percent).sum::<i32>() / languages.len() as i32
        };
        Self {
            job,
            languages,
            overall_percent,
        }
    }
}

/// `xx`, `xxx` or either with a region subtag (`pt-BR`, `zh-Hant`).
fn normalize_language(code: &str) -> Option<String> {
    let code = code.trim();
    let mut parts = code.split('-');
    let primary = parts.next()?;
    if !(2..=3).contains(&primary.len()) || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let region = parts.next();
    if parts.next().is_some() {
        return None;
    }
    match region {
        None => Some(primary.to_ascii_lowercase()),
        Some(r) if (2..=4).contains(&r.len()) && r.chars().all(|c| c.is_ascii_alphanumeric()) => {
            Some(format!("{}-{}", primary.to_ascii_lowercase(), r))
        }
        Some(_) => None,
    }
}

/// Source texts of a talk, flattened for a single translation call.
struct SourceContent {
    talk_id: Uuid,
    title: String,
    description: Option<String>,
    video_url: Option<String>,
    sections: Vec<ToolboxTalkSection>,
    questions: Vec<ToolboxTalkQuestion>,
}

impl SourceContent {
    fn segments(&self) -> Vec<String> {
        let mut out = vec![self.title.clone()];
        out.extend(self.description.clone());
        for section in &self.sections {
            out.push(section.title.clone());
            out.push(section.content.clone());
        }
        for question in &self.questions {
            out.push(question.question_text.clone());
            out.extend(question.options.0.iter().cloned());
        }
        out
    }

    /// Reassembles translated segments in the order `segments` produced them.
    /// Option order is kept so option indexes stay valid.
    fn rebuild(&self, language_code: &str, translated: Vec<String>) -> Result<UpsertTranslation, String> {
        let expected = self.segments().len();
        if translated.len() != expected {
            return Err(format!("expected {expected} translated segments, got {}", translated.len()));
        }
        let mut it = translated.into_iter();
        let mut next = || it.next().unwrap_or_default();

        let title = next();
        let description = self.description.as_ref().map(|_| next());
        let sections = self
            .sections
            .iter()
            .map(|s| TranslatedSection {
                section_id: s.id,
                title: next(),
                content: next(),
            })
            .collect();
        let questions = self
            .questions
            .iter()
            .map(|q| TranslatedQuestion {
                question_id: q.id,
                question_text: next(),
                options: q.options.0.iter().map(|_| next()).collect(),
            })
            .collect();

        Ok(UpsertTranslation {
            talk_id: self.talk_id,
            language_code: language_code.to_string(),
            title,
            description,
            sections,
            questions,
        })
    }
}

/// Handle of a running worker. `run_id` tells a retried job's new worker
/// apart from the one it replaces.
struct Worker {
    run_id: Uuid,
    handle: JoinHandle<()>,
}

/// Runs localization jobs against pluggable providers.
#[derive(Clone)]
pub struct LocalizationPipeline {
    db: DBService,
    content: Arc<dyn ContentStore>,
    translator: Option<Arc<dyn TranslationProvider>>,
    transcriber: Option<Arc<dyn TranscriptionProvider>>,
    max_parallel: usize,
    provider_timeout: Duration,
    events: broadcast::Sender<LocalizationProgress>,
    workers: Arc<DashMap<Uuid, Worker>>,
}

impl LocalizationPipeline {
    pub fn new(
        db: DBService,
        content: Arc<dyn ContentStore>,
        translator: Option<Arc<dyn TranslationProvider>>,
        transcriber: Option<Arc<dyn TranscriptionProvider>>,
        max_parallel: usize,
        provider_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            db,
            content,
            translator,
            transcriber,
            max_parallel: max_parallel.max(1),
            provider_timeout,
            events,
            workers: Arc::new(DashMap::new()),
        }
    }

    /// HTTP providers for whichever endpoints are configured.
    pub fn from_config(db: DBService, content: Arc<dyn ContentStore>, config: &LocalizationConfig) -> Self {
        let translator = config
            .translation_endpoint
            .as_deref()
            .map(|url| Arc::new(HttpTranslationProvider::new(url)) as Arc<dyn TranslationProvider>);
        let transcriber = config
            .transcription_endpoint
            .as_deref()
            .map(|url| Arc::new(HttpTranscriptionProvider::new(url)) as Arc<dyn TranscriptionProvider>);
        Self::new(
            db,
            content,
            translator,
            transcriber,
            config.max_parallel_languages,
            Duration::from_secs(config.provider_timeout_secs),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocalizationProgress> {
        self.events.subscribe()
    }

    pub async fn start(
        &self,
        ctx: &RequestContext,
        talk_id: Uuid,
        request: StartLocalization,
    ) -> Result<LocalizationProgress, LocalizationError> {
        if !request.translate_content && !request.generate_subtitles {
            return Err(LocalizationError::Validation(
                "nothing to do: enable translation or subtitles".to_string(),
            ));
        }
        let talk = self
            .content
            .talk(ctx.tenant_id, talk_id)
            .await?
            .ok_or(LocalizationError::NotFound)?;

        let mut languages = BTreeSet::new();
        for raw in &request.languages {
            let code = normalize_language(raw)
                .ok_or_else(|| LocalizationError::Validation(format!("invalid language code '{raw}'")))?;
            if code.eq_ignore_ascii_case(&talk.source_language) {
                return Err(LocalizationError::Validation(format!(
                    "'{code}' is the talk's source language"
                )));
            }
            languages.insert(code);
        }
        if languages.is_empty() {
            return Err(LocalizationError::Validation("at least one language is required".to_string()));
        }
        if request.generate_subtitles && !talk.has_video() {
            return Err(LocalizationError::Validation("subtitles require a video".to_string()));
        }
        if request.translate_content && self.translator.is_none() {
            return Err(LocalizationError::NotConfigured("translation"));
        }
        if request.generate_subtitles && self.transcriber.is_none() {
            return Err(LocalizationError::NotConfigured("transcription"));
        }

        let languages: Vec<String> = languages.into_iter().collect();
        let job = LocalizationJob::create(
            &self.db.pool,
            &CreateLocalizationJob {
                tenant_id: ctx.tenant_id,
                talk_id,
                source_language: talk.source_language.clone(),
                languages: languages.clone(),
                translate_content: request.translate_content,
                generate_subtitles: request.generate_subtitles,
                created_by: ctx.user_id,
            },
        )
        .await?;

        info!(
            job_id = %job.id,
            talk_id = %talk_id,
            languages = ?languages,
            "[LOCALIZATION] Job queued"
        );
        let progress = self.progress(job).await?;
        self.spawn_worker(progress.job.id, languages);
        Ok(progress)
    }

    pub async fn snapshot(&self, ctx: &RequestContext, job_id: Uuid) -> Result<LocalizationProgress, LocalizationError> {
        let job = LocalizationJob::find_by_id(&self.db.pool, ctx.tenant_id, job_id)
            .await?
            .ok_or(LocalizationError::NotFound)?;
        self.progress(job).await
    }

    pub async fn jobs_for_talk(
        &self,
        ctx: &RequestContext,
        talk_id: Uuid,
        page: PageParams,
    ) -> Result<Page<LocalizationJob>, LocalizationError> {
        let (jobs, total) =
            LocalizationJob::find_by_talk(&self.db.pool, ctx.tenant_id, talk_id, page.limit(), page.offset())
                .await?;
        Ok(Page::new(jobs, page, total))
    }

    /// Settles jobs whose worker is gone, such as those interrupted by a
    /// restart. Returns how many were settled.
    pub async fn recover_orphaned(&self) -> Result<usize, LocalizationError> {
        let mut settled = 0;
        for job in LocalizationJob::find_unfinished(&self.db.pool).await? {
            if self.workers.contains_key(&job.id) {
                continue;
            }
            let progress = self.finish(job.id, "interrupted before the job finished").await?;
            warn!(
                job_id = %job.id,
                status = %progress.job.status,
                "[LOCALIZATION] Settled orphaned job"
            );
            settled += 1;
        }
        Ok(settled)
    }

    /// Requests cancellation. Languages already running finish; the rest
    /// are never started.
    pub async fn cancel(&self, ctx: &RequestContext, job_id: Uuid) -> Result<LocalizationProgress, LocalizationError> {
        let Some(job) = LocalizationJob::request_cancel(&self.db.pool, ctx.tenant_id, job_id).await? else {
            let current = LocalizationJob::find_by_id(&self.db.pool, ctx.tenant_id, job_id)
                .await?
                .ok_or(LocalizationError::NotFound)?;
            return Err(LocalizationError::AlreadyTerminal(current.status));
        };

        let job = if self.workers.contains_key(&job_id) {
            job
        } else {
            // No worker will observe the flag, so settle the job here.
            LocalizationJob::set_status(&self.db.pool, job_id, LocalizationJobStatus::Cancelled).await?
        };

        info!(job_id = %job_id, "[LOCALIZATION] Cancellation requested");
        let progress = self.progress(job).await?;
        self.publish(&progress);
        Ok(progress)
    }

    /// Re-runs only the failed languages of a finished job.
    pub async fn retry(&self, ctx: &RequestContext, job_id: Uuid) -> Result<LocalizationProgress, LocalizationError> {
        let job = LocalizationJob::find_by_id(&self.db.pool, ctx.tenant_id, job_id)
            .await?
            .ok_or(LocalizationError::NotFound)?;
        if !job.status.is_terminal() {
            return Err(LocalizationError::JobActive);
        }
        let languages = LocalizationJob::languages(&self.db.pool, job_id).await?;
        if !languages.iter().any(|l| l.status == LanguageStatus::Failed) {
            return Err(LocalizationError::Validation("no failed languages to retry".to_string()));
        }

        let retried = LocalizationJob::reset_failed_for_retry(&self.db.pool, ctx.tenant_id, job_id)
            .await?
            .ok_or(LocalizationError::JobActive)?;

        info!(job_id = %job_id, languages = ?retried, "[LOCALIZATION] Retrying failed languages");
        let job = LocalizationJob::find(&self.db.pool, job_id).await?;
        let progress = self.progress(job).await?;
        self.spawn_worker(job_id, retried);
        Ok(progress)
    }

    /// Waits for the job's worker to exit, if one is running.
    pub async fn wait(&self, job_id: Uuid) {
        if let Some((_, worker)) = self.workers.remove(&job_id)
            && let Err(e) = worker.handle.await
        {
            error!(job_id = %job_id, "[LOCALIZATION] Worker panicked: {}", e);
        }
    }

    /// Number of workers still registered.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    fn spawn_worker(&self, job_id: Uuid, languages: Vec<String>) {
        let pipeline = self.clone();
        let run_id = Uuid::new_v4();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            // Deregistering below must not race the insert.
            let _ = registered_rx.await;
            if let Err(e) = pipeline.run(job_id, languages).await {
                error!(job_id = %job_id, "[LOCALIZATION] Worker failed: {}", e);
                if let Err(e) = pipeline.finish(job_id, &e.to_string()).await {
                    error!(job_id = %job_id, "[LOCALIZATION] Could not settle job: {}", e);
                }
            }
            pipeline.workers.remove_if(&job_id, |_, worker| worker.run_id == run_id);
        });
        self.workers.insert(job_id, Worker { run_id, handle });
        let _ = registered_tx.send(());
    }

    async fn progress(&self, job: LocalizationJob) -> Result<LocalizationProgress, LocalizationError> {
        let languages = LocalizationJob::languages(&self.db.pool, job.id).await?;
        Ok(LocalizationProgress::new(job, languages))
    }

    fn publish(&self, progress: &LocalizationProgress) {
        // No subscribers is fine.
        let _ = self.events.send(progress.clone());
    }

    /// Recomputes the job status from its languages and broadcasts it.
    async fn refresh(&self, job_id: Uuid, finished: bool) -> Result<LocalizationProgress, LocalizationError> {
        let job = LocalizationJob::find(&self.db.pool, job_id).await?;
        let languages = LocalizationJob::languages(&self.db.pool, job_id).await?;
        let status = LocalizationJobStatus::aggregate(&languages, job.cancel_requested, finished, job.status);
        let job = if status != job.status {
            LocalizationJob::set_status(&self.db.pool, job_id, status).await?
        } else {
            job
        };
        let progress = LocalizationProgress::new(job, languages);
        self.publish(&progress);
        Ok(progress)
    }

    /// Fails whatever the worker left unfinished and settles the job status.
    /// Pending languages of a cancelled job stay pending.
    async fn finish(&self, job_id: Uuid, reason: &str) -> Result<LocalizationProgress, LocalizationError> {
        let job = LocalizationJob::find(&self.db.pool, job_id).await?;
        let failed =
            LocalizationJobLanguage::fail_unfinished(&self.db.pool, job_id, !job.cancel_requested, reason).await?;
        if !failed.is_empty() {
            warn!(job_id = %job_id, languages = ?failed, "[LOCALIZATION] Failed unfinished languages: {}", reason);
        }
        self.refresh(job_id, true).await
    }

    async fn run(&self, job_id: Uuid, languages: Vec<String>) -> Result<(), LocalizationError> {
        let job = LocalizationJob::find(&self.db.pool, job_id).await?;
        let talk = self
            .bounded(self.content.talk(job.tenant_id, job.talk_id))
            .await?
            .ok_or(LocalizationError::NotFound)?;
        let source = Arc::new(SourceContent {
            talk_id: talk.id,
            title: talk.title.clone(),
            description: talk.description.clone(),
            video_url: talk.video_url.clone(),
            sections: self.bounded(self.content.sections(talk.id)).await?,
            questions: self.bounded(self.content.questions(talk.id)).await?,
        });
        let job = Arc::new(job);

        stream::iter(languages)
            .map(|language| {
                let pipeline = self.clone();
                let job = job.clone();
                let source = source.clone();
                async move {
                    if let Err(e) = pipeline.run_language(&job, &source, &language).await {
                        error!(job_id = %job.id, language = %language, "[LOCALIZATION] {}", e);
                    }
                }
            })
            .buffer_unordered(self.max_parallel)
            .collect::<Vec<_>>()
            .await;

        let progress = self.finish(job_id, "worker stopped before the language finished").await?;
        info!(
            job_id = %job_id,
            status = %progress.job.status,
            overall_percent = progress.overall_percent,
            "[LOCALIZATION] Job finished"
        );
        Ok(())
    }

    /// One language, step by step. Provider failures fail the language only.
    async fn run_language(
        &self,
        job: &LocalizationJob,
        source: &SourceContent,
        language: &str,
    ) -> Result<(), LocalizationError> {
        if LocalizationJob::is_cancel_requested(&self.db.pool, job.id).await? {
            info!(job_id = %job.id, language, "[LOCALIZATION] Skipping language after cancel");
            return Ok(());
        }

        let mut steps = Vec::new();
        if job.generate_subtitles {
            steps.push(LocalizationStep::Transcribing);
        }
        if job.translate_content {
            steps.push(LocalizationStep::Translating);
        }
        steps.push(LocalizationStep::Uploading);
        let step_percent = |index: usize| (index * 100 / steps.len()) as i32;

        let mut subtitles = None;
        let mut translation = None;
        for (index, step) in steps.iter().enumerate() {
            LocalizationJobLanguage::mark_step(&self.db.pool, job.id, language, *step, step_percent(index)).await?;
            self.refresh(job.id, false).await?;

            let outcome = match step {
                LocalizationStep::Transcribing => self
                    .transcribe(source, language)
                    .await
                    .map(|track| subtitles = Some(track)),
                LocalizationStep::Translating => self
                    .translate(job, source, language)
                    .await
                    .map(|data| translation = Some(data)),
                LocalizationStep::Uploading => self
                    .upload(source.talk_id, language, translation.take(), subtitles.take())
                    .await,
            };

            if let Err(message) = outcome {
                warn!(job_id = %job.id, language, step = ?step, "[LOCALIZATION] Language failed: {}", message);
                LocalizationJobLanguage::mark_failed(&self.db.pool, job.id, language, &message).await?;
                self.refresh(job.id, false).await?;
                return Ok(());
            }
        }

        LocalizationJobLanguage::mark_completed(&self.db.pool, job.id, language).await?;
        self.refresh(job.id, false).await?;
        info!(job_id = %job.id, language, "[LOCALIZATION] Language completed");
        Ok(())
    }

    fn timeout_message(&self) -> String {
        format!("timed out after {}s", self.provider_timeout.as_secs_f64())
    }

    /// Provider and content store calls share one time limit.
    async fn with_timeout<T, E: Display>(&self, call: impl Future<Output = Result<T, E>>) -> Result<T, String> {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(self.timeout_message()),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ContentError>>,
    ) -> Result<T, LocalizationError> {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LocalizationError::TimedOut(self.timeout_message())),
        }
    }

    async fn transcribe(&self, source: &SourceContent, language: &str) -> Result<SubtitleTrack, String> {
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or_else(|| "transcription provider is not configured".to_string())?;
        let video_url = source
            .video_url
            .as_deref()
            .ok_or_else(|| "talk has no video".to_string())?;
        self.with_timeout(transcriber.transcribe(video_url, language)).await
    }

    async fn translate(
        &self,
        job: &LocalizationJob,
        source: &SourceContent,
        language: &str,
    ) -> Result<UpsertTranslation, String> {
        let translator = self
            .translator
            .as_ref()
            .ok_or_else(|| "translation provider is not configured".to_string())?;
        let segments = source.segments();
        let translated = self
            .with_timeout(translator.translate(&segments, &job.source_language, language))
            .await?;
        source.rebuild(language, translated)
    }

    async fn upload(
        &self,
        talk_id: Uuid,
        language: &str,
        translation: Option<UpsertTranslation>,
        subtitles: Option<SubtitleTrack>,
    ) -> Result<(), String> {
        if let Some(data) = translation {
            self.with_timeout(self.content.save_translation(data)).await?;
        }
        if let Some(track) = subtitles {
            self.with_timeout(
                self.content
                    .save_subtitles(talk_id, language, &track.format, &track.content),
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{TalkFixture, content_store, seed_talk, setup_db};
    use async_trait::async_trait;
    use db::models::{
        course::{CourseTalk, ToolboxTalkCourse},
        toolbox_talk::ToolboxTalk,
        translation::{ToolboxTalkSubtitle, ToolboxTalkTranslation},
    };
    use super::providers::ProviderError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{Notify, Semaphore};

    /// Prefixes every segment with the target language.
    #[derive(Default)]
    struct PrefixTranslator {
        failing: Option<String>,
        recovered: AtomicBool,
    }

    #[async_trait]
    impl TranslationProvider for PrefixTranslator {
        async fn translate(&self, texts: &[String], _source: &str, target: &str) -> Result<Vec<String>, ProviderError> {
            if self.failing.as_deref() == Some(target) && !self.recovered.load(Ordering::SeqCst) {
                return Err(ProviderError::Remote {
                    status: 503,
                    body: "engine unavailable".to_string(),
                });
            }
            Ok(texts.iter().map(|t| format!("[{target}] {t}")).collect())
        }
    }

    /// Blocks the first call until released.
    struct GatedTranslator {
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl TranslationProvider for GatedTranslator {
        async fn translate(&self, texts: &[String], _source: &str, target: &str) -> Result<Vec<String>, ProviderError> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await.map_err(|e| ProviderError::Network(e.to_string()))?;
            Ok(texts.iter().map(|t| format!("[{target}] {t}")).collect())
        }
    }

    struct SlowTranslator;

    #[async_trait]
    impl TranslationProvider for SlowTranslator {
        async fn translate(&self, texts: &[String], _source: &str, _target: &str) -> Result<Vec<String>, ProviderError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(texts.to_vec())
        }
    }

    struct FakeTranscriber;

    #[async_trait]
    impl TranscriptionProvider for FakeTranscriber {
        async fn transcribe(&self, _video_url: &str, language: &str) -> Result<SubtitleTrack, ProviderError> {
            SubtitleTrack::webvtt(format!("WEBVTT\n\n00:00.000 --> 00:02.000\n[{language}] Lift with your legs"))
        }
    }

    /// Delegates to the sqlite store, hanging on the chosen calls.
    struct HangingContent {
        inner: Arc<dyn ContentStore>,
        hang_reads: bool,
        hang_writes: bool,
    }

    impl HangingContent {
        async fn hang(&self, enabled: bool) {
            if enabled {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    #[async_trait]
    impl ContentStore for HangingContent {
        async fn talk(&self, tenant_id: Uuid, talk_id: Uuid) -> Result<Option<ToolboxTalk>, ContentError> {
            self.inner.talk(tenant_id, talk_id).await
        }

        async fn sections(&self, talk_id: Uuid) -> Result<Vec<ToolboxTalkSection>, ContentError> {
            self.hang(self.hang_reads).await;
            self.inner.sections(talk_id).await
        }

        async fn questions(&self, talk_id: Uuid) -> Result<Vec<ToolboxTalkQuestion>, ContentError> {
            self.inner.questions(talk_id).await
        }

        async fn translation(
            &self,
            talk_id: Uuid,
            language_code: &str,
        ) -> Result<Option<ToolboxTalkTranslation>, ContentError> {
            self.inner.translation(talk_id, language_code).await
        }

        async fn save_translation(&self, data: UpsertTranslation) -> Result<ToolboxTalkTranslation, ContentError> {
            self.hang(self.hang_writes).await;
            self.inner.save_translation(data).await
        }

        async fn save_subtitles(
            &self,
            talk_id: Uuid,
            language_code: &str,
            format: &str,
            content: &str,
        ) -> Result<ToolboxTalkSubtitle, ContentError> {
            self.hang(self.hang_writes).await;
            self.inner.save_subtitles(talk_id, language_code, format, content).await
        }

        async fn course(&self, tenant_id: Uuid, course_id: Uuid) -> Result<Option<ToolboxTalkCourse>, ContentError> {
            self.inner.course(tenant_id, course_id).await
        }

        async fn course_talks(&self, course_id: Uuid) -> Result<Vec<CourseTalk>, ContentError> {
            self.inner.course_talks(course_id).await
        }
    }

    fn hanging_pipeline(db: &DBService, hang_reads: bool, hang_writes: bool) -> LocalizationPipeline {
        LocalizationPipeline::new(
            db.clone(),
            Arc::new(HangingContent {
                inner: content_store(db),
                hang_reads,
                hang_writes,
            }),
            Some(Arc::new(PrefixTranslator::default())),
            Some(Arc::new(FakeTranscriber)),
            2,
            Duration::from_millis(20),
        )
    }

    /// Waits for the worker to deregister itself, without `wait`.
    async fn until_idle(pipeline: &LocalizationPipeline) {
        for _ in 0..200 {
            if pipeline.active_workers() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker never deregistered");
    }

    fn request(languages: &[&str]) -> StartLocalization {
        StartLocalization {
            languages: languages.iter().map(|l| l.to_string()).collect(),
            translate_content: true,
            generate_subtitles: false,
        }
    }

    fn pipeline(
        db: &DBService,
        translator: Arc<dyn TranslationProvider>,
        max_parallel: usize,
        timeout: Duration,
    ) -> LocalizationPipeline {
        LocalizationPipeline::new(
            db.clone(),
            content_store(db),
            Some(translator),
            Some(Arc::new(FakeTranscriber)),
            max_parallel,
            timeout,
        )
    }

    fn language<'a>(progress: &'a LocalizationProgress, code: &str) -> &'a LocalizationJobLanguage {
        progress
            .languages
            .iter()
            .find(|l| l.language_code == code)
            .unwrap()
    }

    #[tokio::test]
    async fn translates_and_subtitles_every_language() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture {
            with_video: true,
            ..Default::default()
        })
        .await;
        let ctx = RequestContext::admin(tenant_id, None);
        let pipeline = pipeline(&db, Arc::new(PrefixTranslator::default()), 2, Duration::from_secs(5));
        let mut events = pipeline.subscribe();

        let started = pipeline
            .start(
                &ctx,
                talk.id,
                StartLocalization {
                    languages: vec!["ES".to_string(), "pt-BR".to_string(), "es".to_string()],
                    translate_content: true,
                    generate_subtitles: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(started.languages.len(), 2);
        pipeline.wait(started.job.id).await;

        let done = pipeline.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(done.job.status, LocalizationJobStatus::Completed);
        assert_eq!(done.overall_percent, 100);
        assert!(done.job.completed_at.is_some());

        let content = content_store(&db);
        let es = content.translation(talk.id, "es").await.unwrap().unwrap();
        assert_eq!(es.title, "[es] Manual handling");
        assert_eq!(es.sections.0.len(), 2);
        let options = &es.questions.0[0].options;
        assert_eq!(options[1], "[es] Close to the body");

        let subtitle = ToolboxTalkSubtitle::find(&db.pool, talk.id, "pt-BR").await.unwrap().unwrap();
        assert!(subtitle.content.contains("[pt-BR]"));

        let mut saw_translating = false;
        while let Ok(progress) = events.try_recv() {
            saw_translating |= progress.job.status == LocalizationJobStatus::Translating;
        }
        assert!(saw_translating);
    }

    #[tokio::test]
    async fn one_failed_language_fails_job_and_retry_reruns_only_it() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let translator = Arc::new(PrefixTranslator {
            failing: Some("fr".to_string()),
            ..Default::default()
        });
        let pipeline = pipeline(&db, translator.clone(), 3, Duration::from_secs(5));

        let started = pipeline.start(&ctx, talk.id, request(&["de", "fr"])).await.unwrap();
        pipeline.wait(started.job.id).await;

        let failed = pipeline.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(failed.job.status, LocalizationJobStatus::Failed);
        assert_eq!(language(&failed, "de").status, LanguageStatus::Completed);
        let fr = language(&failed, "fr");
        assert_eq!(fr.status, LanguageStatus::Failed);
        assert!(fr.error.as_deref().unwrap().contains("503"));
        let de_completed_at = language(&failed, "de").completed_at;

        translator.recovered.store(true, Ordering::SeqCst);
        pipeline.retry(&ctx, started.job.id).await.unwrap();
        pipeline.wait(started.job.id).await;

        let done = pipeline.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(done.job.status, LocalizationJobStatus::Completed);
        assert_eq!(language(&done, "de").completed_at, de_completed_at);
        assert_eq!(language(&done, "fr").status, LanguageStatus::Completed);

        assert!(matches!(
            pipeline.retry(&ctx, started.job.id).await,
            Err(LocalizationError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn cancel_stops_at_language_boundary() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let translator = Arc::new(GatedTranslator {
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let pipeline = pipeline(&db, translator.clone(), 1, Duration::from_secs(5));

        let started = pipeline.start(&ctx, talk.id, request(&["de", "es", "fr"])).await.unwrap();
        translator.entered.notified().await;

        assert!(matches!(
            pipeline.start(&ctx, talk.id, request(&["it"])).await,
            Err(LocalizationError::ActiveJobExists)
        ));

        pipeline.cancel(&ctx, started.job.id).await.unwrap();
        translator.gate.add_permits(10);
        pipeline.wait(started.job.id).await;

        let done = pipeline.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(done.job.status, LocalizationJobStatus::Cancelled);
        assert_eq!(language(&done, "de").status, LanguageStatus::Completed);
        assert_eq!(language(&done, "es").status, LanguageStatus::Pending);
        assert_eq!(language(&done, "fr").status, LanguageStatus::Pending);

        assert!(matches!(
            pipeline.cancel(&ctx, started.job.id).await,
            Err(LocalizationError::AlreadyTerminal(LocalizationJobStatus::Cancelled))
        ));
    }

    #[tokio::test]
    async fn provider_timeout_fails_the_language() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let pipeline = pipeline(&db, Arc::new(SlowTranslator), 1, Duration::from_millis(20));

        let started = pipeline.start(&ctx, talk.id, request(&["nl"])).await.unwrap();
        pipeline.wait(started.job.id).await;

        let done = pipeline.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(done.job.status, LocalizationJobStatus::Failed);
        assert!(language(&done, "nl").error.as_deref().unwrap().starts_with("timed out after"));
    }

    #[tokio::test]
    async fn start_validates_request() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let pipeline = pipeline(&db, Arc::new(PrefixTranslator::default()), 1, Duration::from_secs(5));

        for bad in [request(&[]), request(&["english"]), request(&["en"])] {
            assert!(matches!(
                pipeline.start(&ctx, talk.id, bad).await,
                Err(LocalizationError::Validation(_))
            ));
        }
        let subtitles_without_video = StartLocalization {
            generate_subtitles: true,
            ..request(&["es"])
        };
        assert!(matches!(
            pipeline.start(&ctx, talk.id, subtitles_without_video).await,
            Err(LocalizationError::Validation(_))
        ));

        let unconfigured = LocalizationPipeline::new(db.clone(), content_store(&db), None, None, 1, Duration::from_secs(1));
        assert!(matches!(
            unconfigured.start(&ctx, talk.id, request(&["es"])).await,
            Err(LocalizationError::NotConfigured("translation"))
        ));
    }

    #[test]
    fn language_codes_are_normalized() {
        assert_eq!(normalize_language(" ES ").as_deref(), Some("es"));
        assert_eq!(normalize_language("pt-BR").as_deref(), Some("pt-BR"));
        assert_eq!(normalize_language("zh-Hant").as_deref(), Some("zh-Hant"));
        assert!(normalize_language("e").is_none());
        assert!(normalize_language("en-US-x").is_none());
        assert!(normalize_language("12").is_none());
    }

    #[tokio::test]
    async fn slow_content_store_write_fails_the_language() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let pipeline = hanging_pipeline(&db, false, true);

        let started = pipeline.start(&ctx, talk.id, request(&["es"])).await.unwrap();
        until_idle(&pipeline).await;

        let done = pipeline.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(done.job.status, LocalizationJobStatus::Failed);
        let es = language(&done, "es");
        assert_eq!(es.status, LanguageStatus::Failed);
        assert!(es.error.as_deref().unwrap().starts_with("timed out after"));
        assert!(content_store(&db).translation(talk.id, "es").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn worker_error_settles_job_and_frees_the_talk() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let stalled = hanging_pipeline(&db, true, false);

        let started = stalled.start(&ctx, talk.id, request(&["de", "es"])).await.unwrap();
        until_idle(&stalled).await;

        let done = stalled.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(done.job.status, LocalizationJobStatus::Failed);
        assert!(done.job.completed_at.is_some());
        for code in ["de", "es"] {
            let lang = language(&done, code);
            assert_eq!(lang.status, LanguageStatus::Failed);
            assert!(lang.error.as_deref().unwrap().starts_with("timed out after"));
        }

        let healthy = pipeline(&db, Arc::new(PrefixTranslator::default()), 2, Duration::from_secs(5));
        let again = healthy.start(&ctx, talk.id, request(&["de"])).await.unwrap();
        healthy.wait(again.job.id).await;
        assert_eq!(
            healthy.snapshot(&ctx, again.job.id).await.unwrap().job.status,
            LocalizationJobStatus::Completed
        );
    }

    #[tokio::test]
    async fn finished_workers_deregister_themselves() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let pipeline = pipeline(&db, Arc::new(PrefixTranslator::default()), 2, Duration::from_secs(5));

        let started = pipeline.start(&ctx, talk.id, request(&["de", "fr"])).await.unwrap();
        assert_eq!(pipeline.active_workers(), 1);
        until_idle(&pipeline).await;

        let done = pipeline.snapshot(&ctx, started.job.id).await.unwrap();
        assert_eq!(done.job.status, LocalizationJobStatus::Completed);
        assert!(matches!(
            pipeline.cancel(&ctx, started.job.id).await,
            Err(LocalizationError::AlreadyTerminal(LocalizationJobStatus::Completed))
        ));
    }

    #[tokio::test]
    async fn recover_orphaned_settles_interrupted_jobs() {
        let db = setup_db().await;
        let tenant_id = Uuid::new_v4();
        let interrupted_talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let cancelled_talk = seed_talk(&db, tenant_id, TalkFixture::default()).await;
        let ctx = RequestContext::admin(tenant_id, None);
        let pipeline = pipeline(&db, Arc::new(PrefixTranslator::default()), 2, Duration::from_secs(5));

        let job_for = |talk_id: Uuid| CreateLocalizationJob {
            tenant_id,
            talk_id,
            source_language: "en".to_string(),
            languages: vec!["de".to_string(), "es".to_string()],
            translate_content: true,
            generate_subtitles: false,
            created_by: None,
        };
        let interrupted = LocalizationJob::create(&db.pool, &job_for(interrupted_talk.id)).await.unwrap();
        LocalizationJobLanguage::mark_step(&db.pool, interrupted.id, "de", LocalizationStep::Translating, 50)
            .await
            .unwrap();
        let cancelled = LocalizationJob::create(&db.pool, &job_for(cancelled_talk.id)).await.unwrap();
        LocalizationJob::request_cancel(&db.pool, tenant_id, cancelled.id).await.unwrap();

        assert_eq!(pipeline.recover_orphaned().await.unwrap(), 2);
        assert_eq!(pipeline.recover_orphaned().await.unwrap(), 0);

        let failed = pipeline.snapshot(&ctx, interrupted.id).await.unwrap();
        assert_eq!(failed.job.status, LocalizationJobStatus::Failed);
        assert_eq!(language(&failed, "de").status, LanguageStatus::Failed);
        assert_eq!(language(&failed, "es").status, LanguageStatus::Failed);

        let stopped = pipeline.snapshot(&ctx, cancelled.id).await.unwrap();
        assert_eq!(stopped.job.status, LocalizationJobStatus::Cancelled);
        assert_eq!(language(&stopped, "de").status, LanguageStatus::Pending);

        pipeline.retry(&ctx, interrupted.id).await.unwrap();
        pipeline.wait(interrupted.id).await;
        assert_eq!(
            pipeline.snapshot(&ctx, interrupted.id).await.unwrap().job.status,
            LocalizationJobStatus::Completed
        );

        let page = pipeline
            .jobs_for_talk(&ctx, interrupted_talk.id, PageParams::new(1, 10))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, interrupted.id);
    }
}
