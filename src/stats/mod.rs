//! Rolling statistics over fixed trailing windows of probe results.

mod window;

pub use window::*;
