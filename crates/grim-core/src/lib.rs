//! Foundational low-level utilities shared across grim crates.
//!
//! Provides atomic file-write helpers and unix-time utilities used by run
//! result persistence and elapsed-time bookkeeping.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::current_unix_timestamp;
