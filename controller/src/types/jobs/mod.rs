pub mod definition;
pub mod job;
pub mod status;
pub mod template;

pub use definition::{FilenameFields, JobDefinition, JobName, Tag};
pub use job::{Job, JobInput};
pub use status::{ClassificationRules, Status, StatusClass};
