pub mod controller;
pub mod executor;
