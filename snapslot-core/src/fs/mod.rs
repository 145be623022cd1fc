//! Local filesystem helpers: sorted traversal and I/O scheduling class.

pub mod ioprio;
pub mod walker;
