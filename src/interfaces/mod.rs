//! Outer surfaces: the HTTP service and CSV output.

pub mod csv;
pub mod http;
