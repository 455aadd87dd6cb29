use crate::db::queries;
use crate::models::ReportFilter;
use crate::service::{CatalogService, ForecastService, ReportService};
use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;

/// 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 发票浏览 (发票 + 明细行)
pub async fn fetch_invoices(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.fetch_invoices(&filter).await;
    Json(report.into_data()).into_response()
}

/// 最贵发票 Top 20
/// 聚合失败与真无数据一样返回空数组 (看板可用性优先)
pub async fn most_expensive_invoices(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.most_expensive_invoices(&filter).await;
    Json(report.into_data()).into_response()
}

/// 发票导出 CSV
pub async fn export_invoices(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let rows = service.export_invoices(&filter).await.into_data();

    let mut buffer = Vec::new();
    match queries::export_to_csv(&rows, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            let response = ErrorResponse {
                error: format!("Failed to export invoices: {}", e),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}

/// 明细行查询 (带 sku 时按商品编码模糊限定)
pub async fn invoice_lines(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let sku = filter
        .sku
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let report = match sku {
        Some(sku) => service.invoice_lines_by_sku(&sku, &filter).await,
        None => service.invoice_lines_by_filters(&filter).await,
    };
    Json(report.into_data()).into_response()
}

/// 看板汇总
pub async fn dashboard_stats(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.dashboard_stats(&filter).await;
    Json(report.into_data()).into_response()
}

/// Top SKU 消费榜
pub async fn top_skus_by_spend(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.top_skus_by_spend(&filter).await;
    Json(report.into_data()).into_response()
}

/// SKU 补货节奏
pub async fn sku_replenishment_cadence(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.sku_replenishment_cadence(&filter).await;
    Json(report.into_data()).into_response()
}

/// 门店×品类热力图
pub async fn location_category_heat_map(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.location_category_heat_map(&filter).await;
    Json(report.into_data()).into_response()
}

/// 品类金额波动
pub async fn category_volatility(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.category_volatility(&filter).await;
    Json(report.into_data()).into_response()
}

/// 月度品类消费趋势
pub async fn category_spend_trend(
    State(service): State<Arc<ReportService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let report = service.category_spend_trend(&filter).await;
    Json(report.into_data()).into_response()
}

/// 门店发票数统计
pub async fn cost_per_location(State(service): State<Arc<ReportService>>) -> Response {
    let report = service.cost_per_location().await;
    Json(report.into_data()).into_response()
}

/// 全部门店清单
pub async fn all_locations(State(service): State<Arc<CatalogService>>) -> Response {
    Json(service.all_locations().await).into_response()
}

/// 全部品类清单
pub async fn all_categories(State(service): State<Arc<CatalogService>>) -> Response {
    Json(service.all_categories().await).into_response()
}

/// SKU 目录
pub async fn all_skus(State(service): State<Arc<CatalogService>>) -> Response {
    Json(service.all_skus().await).into_response()
}

/// 库存预测 (过滤条件版)
pub async fn forecast_inventory(
    State(service): State<Arc<ForecastService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    match service.forecast_inventory(&filter).await {
        Ok(forecast) => (StatusCode::OK, Json(forecast)).into_response(),
        Err(e) => {
            let response = ErrorResponse {
                error: format!("Failed to forecast inventory: {}", e),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}

/// 单 SKU 需求预测 (sku 必填)
pub async fn forecast_sku_demand(
    State(service): State<Arc<ForecastService>>,
    Json(filter): Json<ReportFilter>,
) -> Response {
    let Some(sku) = filter
        .sku
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
    else {
        let response = ErrorResponse {
            error: "sku is required".to_string(),
        };
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    };

    match service.forecast_sku_demand(&sku, &filter).await {
        Ok(forecast) => (StatusCode::OK, Json(forecast)).into_response(),
        Err(e) => {
            let response = ErrorResponse {
                error: format!("Failed to forecast SKU demand: {}", e),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}
