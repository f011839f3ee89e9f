pub mod catalog;
pub mod config;
pub mod mode;
pub mod selection;
