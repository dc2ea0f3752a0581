//! PersonaPRD: cluster Reddit discussions into pain points and draft
//! persona-specific product requirement documents from them.

pub mod config;
pub mod display;
pub mod pprd;
