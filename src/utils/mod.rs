//! Filesystem helpers

pub mod path;
pub mod socket;
