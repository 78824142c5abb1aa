//! Dispatch engine services.

#![allow(missing_docs)]

pub mod dispatcher;
pub mod event_publisher;
pub mod ingestion;
pub mod providers;
pub mod receipts;
pub mod selector;
pub mod template;
