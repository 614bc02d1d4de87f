pub mod controller;
pub mod jobs;
pub mod limitless;

pub use controller::ControllerSection;
pub use jobs::JobSection;
pub use limitless::{LimitlessSection, ProverMode};
