pub mod survey_cmd;

pub use survey_cmd::{CommandStatus, INFRA_EXIT_CODE, SurveyCli, SurveySubcommand};
