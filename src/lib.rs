pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod service;

pub use cache::QueryCache;
pub use config::AppConfig;
pub use db::create_pool;
pub use service::{CatalogService, ForecastService, ReportService};
