//! Small helpers.

pub mod size;
