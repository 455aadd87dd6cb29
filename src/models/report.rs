use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use sqlx::FromRow;

/// 聚合结果状态
/// Ok: 正常命中; Empty: 过滤后真无数据; Degraded: 存储查询失败后降级为空
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Ok,
    Empty,
    Degraded,
}

/// 聚合结果包装: 对外HTTP契约只取 data, 状态留给日志/测试区分空与失败
#[derive(Debug, Clone)]
pub struct Report<T> {
    pub status: ReportStatus,
    pub data: T,
}

impl<T> Report<T> {
    pub fn ok(data: T) -> Self {
        Self { status: ReportStatus::Ok, data }
    }

    pub fn empty(data: T) -> Self {
        Self { status: ReportStatus::Empty, data }
    }

    pub fn degraded(data: T) -> Self {
        Self { status: ReportStatus::Degraded, data }
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

/// 看板汇总 (总消费/按品类/按门店)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_expenses: BigDecimal,
    pub expenses_by_category: IndexMap<String, BigDecimal>,
    pub expenses_by_location: IndexMap<String, BigDecimal>,
}

impl DashboardStats {
    pub fn empty() -> Self {
        Self {
            total_expenses: BigDecimal::from(0),
            expenses_by_category: IndexMap::new(),
            expenses_by_location: IndexMap::new(),
        }
    }
}

/// Top SKU 消费行 (降序截断)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkuSpend {
    pub sku: String,
    pub description: String,
    pub category: String,
    pub total: BigDecimal,
}

/// SKU 目录行 (下拉框用)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct SkuCatalogEntry {
    pub sku: String,
    pub description: String,
    pub category: String,
}

/// 门店×品类热力图: 行=门店, 列=品类, 缺失组合补0
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatMap {
    pub locations: Vec<String>,
    pub categories: Vec<String>,
    pub data: Vec<HeatMapRow>,
}

impl HeatMap {
    pub fn empty() -> Self {
        Self {
            locations: Vec::new(),
            categories: Vec::new(),
            data: Vec::new(),
        }
    }
}

/// 热力图单行: 品类列拍平进JSON对象
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatMapRow {
    pub location: String,
    #[serde(flatten)]
    pub spend: IndexMap<String, BigDecimal>,
}

/// 品类金额波动统计 (简化分位法: floor(n/4) / floor(3n/4))
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryVolatility {
    pub category: String,
    pub min: BigDecimal,
    pub q1: BigDecimal,
    pub median: BigDecimal,
    pub q3: BigDecimal,
    pub max: BigDecimal,
    pub mean: BigDecimal,
}

/// SKU 补货节奏: 采购次数 + 平均间隔天数 (不足两次为 null)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplenishmentCadence {
    pub sku: String,
    pub description: String,
    pub avg_days_between: Option<f64>,
    pub purchase_count: usize,
}

/// 月度品类消费趋势单行 (month = YYYY-MM)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRow {
    pub month: String,
    #[serde(flatten)]
    pub categories: IndexMap<String, BigDecimal>,
}

/// 门店发票数统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationCount {
    pub name: String,
    pub value: i64,
}

/// 库存预测行 (按过滤条件聚合)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryForecast {
    pub sku: String,
    pub description: String,
    pub purchase_count: usize,
    pub avg_days_between: f64,
    pub last_purchase: DateTime<Utc>,
    pub next_expected: DateTime<Utc>,
}

/// 单 SKU 需求预测
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuDemandForecast {
    pub sku: String,
    pub description: String,
    pub purchase_count: usize,
    pub avg_days_between: Option<f64>,
    pub avg_qty_per_purchase: Option<BigDecimal>,
    pub last_purchase: Option<DateTime<Utc>>,
    pub next_expected: Option<DateTime<Utc>>,
}
