use std::sync::Arc;

use db::DBService;
use services::services::{
    assignment_status::AssignmentService,
    completion_workflow::CompletionWorkflow,
    config::Config,
    content::{ContentStore, SqliteContentStore},
    course_planner::CoursePlanner,
    localization::LocalizationPipeline,
    notifier::{Notifier, TracingNotifier},
    schedule_engine::ScheduleEngine,
};
use tokio::sync::RwLock;

pub mod error;
pub mod middleware;
pub mod routes;
pub mod runners;

/// Everything a request handler or background runner needs. Cheap to clone;
/// every engine shares the same pool.
#[derive(Clone)]
pub struct AppState {
    db: DBService,
    config: Arc<RwLock<Config>>,
    schedules: ScheduleEngine,
    assignments: AssignmentService,
    workflow: CompletionWorkflow,
    courses: CoursePlanner,
    localization: LocalizationPipeline,
}

impl AppState {
    pub fn new(db: DBService, config: Config) -> Self {
        let content: Arc<dyn ContentStore> = Arc::new(SqliteContentStore::new(db.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

        let localization =
            LocalizationPipeline::from_config(db.clone(), content.clone(), &config.localization);

        Self {
            schedules: ScheduleEngine::new(db.clone(), content.clone(), &config),
            assignments: AssignmentService::new(db.clone(), content.clone(), notifier),
            workflow: CompletionWorkflow::new(db.clone(), content.clone()),
            courses: CoursePlanner::new(db.clone(), content),
            localization,
            config: Arc::new(RwLock::new(config)),
            db,
        }
    }

    /// Swaps the localization pipeline, e.g. for one wired to other providers.
    pub fn with_localization(mut self, localization: LocalizationPipeline) -> Self {
        self.localization = localization;
        self
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    pub fn schedules(&self) -> &ScheduleEngine {
        &self.schedules
    }

    pub fn assignments(&self) -> &AssignmentService {
        &self.assignments
    }

    pub fn workflow(&self) -> &CompletionWorkflow {
        &self.workflow
    }

    pub fn courses(&self) -> &CoursePlanner {
        &self.courses
    }

    pub fn localization(&self) -> &LocalizationPipeline {
        &self.localization
    }
}
