pub mod attendance;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod exams;
pub mod finance;
pub mod notifications;
pub mod plans;
pub mod progress;
pub mod settings;
pub mod students;
