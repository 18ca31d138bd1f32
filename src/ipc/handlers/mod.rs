pub mod attendance;
pub mod backup;
pub mod catalog;
pub mod core;
pub mod courses;
pub mod dashboard;
pub mod deductions;
pub mod finance;
pub mod leads;
pub mod settings;
pub mod students;
pub mod sync;
