pub mod backup;
pub mod catalog;
pub mod core;
pub mod grades;
pub mod groups;
pub mod roster;
pub mod statistics;
