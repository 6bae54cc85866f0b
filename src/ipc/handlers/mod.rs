pub mod analytics;
pub mod attendance;
pub mod core;
pub mod dataset;
pub mod grades;
