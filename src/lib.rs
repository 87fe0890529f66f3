//! Assistant Bridge — chat channels in front of the OpenAI Assistants API.

pub mod assistant;
pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod i18n;
pub mod tools;
