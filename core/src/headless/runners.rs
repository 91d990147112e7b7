//! CLI runners, one module per tool.

pub mod claude;
