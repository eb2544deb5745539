pub mod completion;
pub mod course;
pub mod course_assignment;
pub mod employee;
pub mod localization_job;
pub mod quiz_attempt;
pub mod scheduled_talk;
pub mod section_progress;
pub mod toolbox_talk;
pub mod toolbox_talk_schedule;
pub mod translation;

#[cfg(test)]
pub(crate) mod test_utils;
