pub mod history;
pub mod state;
pub mod usage;
