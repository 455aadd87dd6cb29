pub mod filter;
pub mod invoice;
pub mod report;

pub use filter::{DimensionFilter, ReportFilter, ALL_CATEGORIES, ALL_LOCATIONS};
pub use invoice::{
    Invoice, InvoiceDateRow, InvoiceDimRow, InvoiceExportRow, InvoiceLine, InvoiceRef,
    InvoiceSummary, InvoiceWithLines, JoinedInvoiceLine, LineCadenceRow, LineCategoryLite,
    LineCategoryRow, LineSpendRow,
};
pub use report::{
    CategoryVolatility, DashboardStats, HeatMap, HeatMapRow, InventoryForecast, LocationCount,
    Report, ReportStatus, ReplenishmentCadence, SkuCatalogEntry, SkuDemandForecast, SkuSpend,
    TrendRow,
};
