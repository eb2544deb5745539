pub mod assignment_status;
pub mod completion_workflow;
pub mod config;
pub mod content;
pub mod context;
pub mod course_planner;
pub mod localization;
pub mod notifier;
pub mod quiz_grading;
pub mod recurrence;
pub mod schedule_engine;

#[cfg(test)]
pub(crate) mod test_support;
