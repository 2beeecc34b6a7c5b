//! run-notifier library crate.
//!
//! Relays run status changes to the destinations workspaces subscribe to:
//! generic webhooks, chat webhooks and Google Cloud pub/sub topics.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod leader;
pub mod logging;
pub mod notification;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
