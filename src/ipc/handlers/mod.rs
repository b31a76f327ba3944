pub mod backup_exchange;
pub mod context;
pub mod core;
pub mod levels;
pub mod programs;
pub mod semesters;
pub mod sessions;
pub mod versions;
