//! Command implementations by domain.

pub mod directory;
pub mod identity;
pub mod message;
pub mod migrate;
pub mod presence;
pub mod run;
