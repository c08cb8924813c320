//! Confidence histogram cache and threshold queries over YFCC object detections.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod histogram;
pub mod import;
pub mod labels;
pub mod logging;
pub mod overlay;
pub mod service;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use service::HistogramService;
