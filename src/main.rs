use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use wash_insights_rust::{
    api, create_pool, AppConfig, CatalogService, ForecastService, QueryCache, ReportService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    // 查询缓存按配置构造一次, 注入各服务共享
    let cache = Arc::new(QueryCache::new(
        Duration::from_secs(config.cache.ttl_secs),
        config.cache.max_retries,
        Duration::from_millis(config.cache.retry_delay_ms),
    ));

    let report_service = Arc::new(ReportService::new(pool.clone(), cache.clone()));
    let catalog_service = Arc::new(CatalogService::new(pool.clone(), cache));
    let forecast_service = Arc::new(ForecastService::new(pool));

    // 报表聚合路由
    let report_routes = Router::new()
        .route("/api/invoices", post(api::fetch_invoices))
        .route("/api/invoices/most-expensive", post(api::most_expensive_invoices))
        .route("/api/invoices/export", post(api::export_invoices))
        .route("/api/invoice-lines", post(api::invoice_lines))
        .route("/api/dashboard/stats", post(api::dashboard_stats))
        .route("/api/skus/top-by-spend", post(api::top_skus_by_spend))
        .route("/api/skus/replenishment-cadence", post(api::sku_replenishment_cadence))
        .route("/api/analytics/heatmap", post(api::location_category_heat_map))
        .route("/api/analytics/category-volatility", post(api::category_volatility))
        .route("/api/analytics/category-trend", post(api::category_spend_trend))
        .route("/api/analytics/cost-per-location", get(api::cost_per_location))
        .with_state(report_service);

    // 过滤目录路由
    let catalog_routes = Router::new()
        .route("/api/locations", get(api::all_locations))
        .route("/api/categories", get(api::all_categories))
        .route("/api/skus", get(api::all_skus))
        .with_state(catalog_service);

    // 库存预测路由 (历史上两种请求契约并存, 各保留为独立端点)
    let forecast_routes = Router::new()
        .route("/api/inventory/forecast", post(api::forecast_inventory))
        .route("/api/inventory/forecast/sku", post(api::forecast_sku_demand))
        .with_state(forecast_service);

    // 合并路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .merge(report_routes)
        .merge(catalog_routes)
        .merge(forecast_routes)
        .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/invoices/most-expensive - Top 20 invoices by total");
    info!("  POST /api/skus/top-by-spend       - Top SKUs by spend");
    info!("  POST /api/analytics/heatmap       - Location x category heat map");
    info!("  POST /api/inventory/forecast      - Inventory forecast");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
