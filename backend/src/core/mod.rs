//! Core time primitives

pub mod time;
