pub mod catalog;
pub mod forecast;
pub mod reports;

pub use catalog::CatalogService;
pub use forecast::ForecastService;
pub use reports::ReportService;
