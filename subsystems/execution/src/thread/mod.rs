//! # Thread Management
//!
//! Thread status and the transition rules every scheduler enforces.

pub mod states;

pub use states::*;
