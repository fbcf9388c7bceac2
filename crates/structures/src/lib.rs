//! Small data structures shared by the graphics crates.

pub mod flagvec;
pub mod slot_table;
