pub mod claude;
pub mod fetch;
