use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 发票主表 (invoices)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub invoice_date: NaiveDate,
    pub source: String,
    pub invoice_total: BigDecimal,
    pub location: String,
    pub email_subject: Option<String>,
    pub pdf_url: Option<String>,
    pub status: Option<String>,
    pub invoice_number: Option<String>,
    pub vendor_name: Option<String>,
    pub subtotal: Option<BigDecimal>,
    pub tax: Option<BigDecimal>,
    pub shipping: Option<BigDecimal>,
    pub total: Option<BigDecimal>,
}

/// 发票明细表 (invoice_lines)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: i64,
    pub invoice_id: i64,     // 关联发票ID
    pub line_number: i32,
    pub sku: String,         // 商品编码
    pub description: Option<String>,
    pub uom: Option<String>, // 计量单位
    pub qty: Option<BigDecimal>,
    pub unit_price: Option<BigDecimal>,
    pub line_total: BigDecimal,
    pub tax: Option<BigDecimal>,
    pub category: String,    // 品类 (含 "ignore" 的不参与消费统计)
    pub created_at: DateTime<Utc>,
}

/// 发票 + 其明细行 (浏览接口返回)
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceWithLines {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
}

/// 发票元数据投影 (用于明细行回挂发票信息)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InvoiceRef {
    pub id: i64,
    pub invoice_date: NaiveDate,
    pub invoice_number: Option<String>,
    pub source: String,
    pub location: String,
    pub pdf_url: Option<String>,
}

/// 最贵发票投影 (按总额降序)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InvoiceSummary {
    pub id: i64,
    pub invoice_date: NaiveDate,
    pub invoice_number: Option<String>,
    pub source: String,
    pub location: String,
    pub invoice_total: BigDecimal,
    pub pdf_url: Option<String>,
}

/// 明细行 + 所属发票元数据 (内存join结果, 按发票日期降序返回)
#[derive(Debug, Clone, Serialize)]
pub struct JoinedInvoiceLine {
    #[serde(flatten)]
    pub line: InvoiceLine,
    pub invoice_date: NaiveDate,
    pub invoice_number: Option<String>,
    pub source: String,
    pub location: String,
    pub pdf_url: Option<String>,
}

/// 发票维度投影 (热力图/门店计数只需要 id + 门店)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceDimRow {
    pub id: i64,
    pub location: String,
}

/// 发票日期投影 (月度趋势按 YYYY-MM 分桶)
#[derive(Debug, Clone, FromRow)]
pub struct InvoiceDateRow {
    pub id: i64,
    pub invoice_date: NaiveDate,
}

/// 明细消费投影 (Top SKU 聚合)
#[derive(Debug, Clone, FromRow)]
pub struct LineSpendRow {
    pub sku: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub line_total: BigDecimal,
}

/// 明细品类投影 (热力图/看板/波动聚合)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LineCategoryRow {
    pub invoice_id: i64,
    pub category: String,
    pub line_total: BigDecimal,
}

/// 明细品类轻量投影 (最贵发票的品类匹配, 不做 ignore 剔除, 品类可空)
#[derive(Debug, Clone, FromRow)]
pub struct LineCategoryLite {
    pub invoice_id: i64,
    pub category: Option<String>,
}

/// 明细采购时间投影 (补货节奏/预测聚合)
#[derive(Debug, Clone, FromRow)]
pub struct LineCadenceRow {
    pub invoice_id: i64,
    pub sku: String,
    pub description: Option<String>,
    pub category: String,
    pub qty: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
}

/// CSV 导出行 (一行明细拍平一条记录)
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceExportRow {
    pub invoice_id: i64,
    pub invoice_date: NaiveDate,
    pub source: String,
    pub location: String,
    pub status: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub line_total: BigDecimal,
    pub invoice_total: BigDecimal,
}
