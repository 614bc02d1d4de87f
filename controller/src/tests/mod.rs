pub mod workers;
