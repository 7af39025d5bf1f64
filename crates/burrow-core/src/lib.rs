pub mod backup;
pub mod catalog;
pub mod chain;
pub mod checksum;
pub mod commands;
pub mod compress;
pub mod config;
pub mod content;
pub mod error;
pub mod failpoint;
pub mod merge;
pub mod page;
pub mod platform;
pub mod retention;

#[cfg(test)]
mod tests;
