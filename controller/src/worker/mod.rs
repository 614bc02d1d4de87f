pub mod conflation;
pub mod controller;
pub mod executor;
pub mod fs_watcher;
pub mod state;
pub mod transition;

pub use controller::Controller;
pub use state::{ShutdownHandle, ShutdownReason};
