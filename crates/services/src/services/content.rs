use async_trait::async_trait;
use db::{
    DBService,
    models::{
        course::{CourseError, CourseTalk, ToolboxTalkCourse},
        toolbox_talk::{ToolboxTalk, ToolboxTalkError, ToolboxTalkQuestion, ToolboxTalkSection},
        translation::{
            ToolboxTalkSubtitle, ToolboxTalkTranslation, TranslationError, UpsertTranslation,
        },
    },
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error(transparent)]
    Talk(#[from] ToolboxTalkError),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error(transparent)]
    Course(#[from] CourseError),
}

/// Read access to authored training content, plus the write path used by
/// localization jobs. Authoring itself lives elsewhere.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn talk(&self, tenant_id: Uuid, talk_id: Uuid) -> Result<Option<ToolboxTalk>, ContentError>;

    async fn sections(&self, talk_id: Uuid) -> Result<Vec<ToolboxTalkSection>, ContentError>;

    async fn questions(&self, talk_id: Uuid) -> Result<Vec<ToolboxTalkQuestion>, ContentError>;

    async fn translation(
        &self,
        talk_id: Uuid,
        language_code: &str,
    ) -> Result<Option<ToolboxTalkTranslation>, ContentError>;

    async fn save_translation(
        &self,
        data: UpsertTranslation,
    ) -> Result<ToolboxTalkTranslation, ContentError>;

    async fn save_subtitles(
        &self,
        talk_id: Uuid,
        language_code: &str,
        format: &str,
        content: &str,
    ) -> Result<ToolboxTalkSubtitle, ContentError>;

    async fn course(
        &self,
        tenant_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<ToolboxTalkCourse>, ContentError>;

    async fn course_talks(&self, course_id: Uuid) -> Result<Vec<CourseTalk>, ContentError>;
}

#[derive(Clone)]
pub struct SqliteContentStore {
    db: DBService,
}

impl SqliteContentStore {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn talk(&self, tenant_id: Uuid, talk_id: Uuid) -> Result<Option<ToolboxTalk>, ContentError> {
        Ok(ToolboxTalk::find_by_id(&self.db.pool, tenant_id, talk_id).await?)
    }

    async fn sections(&self, talk_id: Uuid) -> Result<Vec<ToolboxTalkSection>, ContentError> {
        Ok(ToolboxTalkSection::find_by_talk(&self.db.pool, talk_id).await?)
    }

    async fn questions(&self, talk_id: Uuid) -> Result<Vec<ToolboxTalkQuestion>, ContentError> {
        Ok(ToolboxTalkQuestion::find_by_talk(&self.db.pool, talk_id).await?)
    }

    async fn translation(
        &self,
        talk_id: Uuid,
        language_code: &str,
    ) -> Result<Option<ToolboxTalkTranslation>, ContentError> {
        Ok(ToolboxTalkTranslation::find(&self.db.pool, talk_id, language_code).await?)
    }

    async fn save_translation(
        &self,
        data: UpsertTranslation,
    ) -> Result<ToolboxTalkTranslation, ContentError> {
        Ok(ToolboxTalkTranslation::upsert(&self.db.pool, data).await?)
    }

    async fn save_subtitles(
        &self,
        talk_id: Uuid,
        language_code: &str,
        format: &str,
        content: &str,
    ) -> Result<ToolboxTalkSubtitle, ContentError> {
        Ok(ToolboxTalkSubtitle::upsert(&self.db.pool, talk_id, language_code, format, content).await?)
    }

    async fn course(
        &self,
        tenant_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<ToolboxTalkCourse>, ContentError> {
        Ok(ToolboxTalkCourse::find_by_id(&self.db.pool, tenant_id, course_id).await?)
    }

    async fn course_talks(&self, course_id: Uuid) -> Result<Vec<CourseTalk>, ContentError> {
        Ok(ToolboxTalkCourse::talks(&self.db.pool, course_id).await?)
    }
}
