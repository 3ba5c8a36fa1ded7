pub mod backup_exchange;
pub mod core;
pub mod export;
pub mod katrol;
pub mod scores;
pub mod settings;
pub mod students;
pub mod years;
