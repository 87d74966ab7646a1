pub mod metadata;
pub mod models;
pub mod state_machine;
