//! Live scanning and bookmaker links.

pub mod links;
pub mod scanner;
