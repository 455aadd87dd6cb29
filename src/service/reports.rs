use crate::cache::{FetchOptions, QueryCache};
use crate::db::queries;
use crate::models::{
    CategoryVolatility, DashboardStats, DimensionFilter, HeatMap, HeatMapRow, InvoiceDateRow,
    InvoiceDimRow, InvoiceExportRow, InvoiceLine, InvoiceRef, InvoiceSummary, InvoiceWithLines,
    JoinedInvoiceLine, LineCadenceRow, LineCategoryLite, LineCategoryRow, LineSpendRow,
    LocationCount, Report, ReplenishmentCadence, ReportFilter, SkuSpend, TrendRow,
};
use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 最贵发票榜单长度
const MOST_EXPENSIVE_LIMIT: usize = 20;
/// Top SKU 默认截断行数
const DEFAULT_TOP_SKU_LIMIT: usize = 100;

/// 报表聚合服务
/// 统一流程: 过滤查发票 -> 收集ID -> 分批查明细 -> 内存join -> 聚合
/// 任何一步存储失败都降级为空结果, 不向调用方抛错
pub struct ReportService {
    pool: PgPool,
    cache: Arc<QueryCache>,
}

impl ReportService {
    pub fn new(pool: PgPool, cache: Arc<QueryCache>) -> Self {
        Self { pool, cache }
    }

    /// 发票浏览: 发票 + 其明细行
    /// 明细全部被剔除(ignore 或品类不命中)的发票不返回
    pub async fn fetch_invoices(&self, filter: &ReportFilter) -> Report<Vec<InvoiceWithLines>> {
        match self.fetch_invoices_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("fetch_invoices degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn fetch_invoices_inner(
        &self,
        filter: &ReportFilter,
    ) -> Result<Report<Vec<InvoiceWithLines>>, BoxError> {
        let invoices = queries::list_invoices(&self.pool, filter).await?;
        if invoices.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let invoice_ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let lines = queries::list_lines_full(&self.pool, &invoice_ids, filter, None).await?;

        // 明细按发票分组
        let mut lines_by_invoice: HashMap<i64, Vec<InvoiceLine>> = HashMap::new();
        for line in lines {
            lines_by_invoice.entry(line.invoice_id).or_default().push(line);
        }

        // 只剩 ignore 明细(或品类不命中)的发票整票跳过
        let result: Vec<InvoiceWithLines> = invoices
            .into_iter()
            .filter_map(|invoice| {
                let lines = lines_by_invoice.remove(&invoice.id)?;
                Some(InvoiceWithLines { invoice, lines })
            })
            .collect();

        if result.is_empty() {
            Ok(Report::empty(result))
        } else {
            Ok(Report::ok(result))
        }
    }

    /// 看板汇总: 总消费 + 按品类 + 按门店
    pub async fn dashboard_stats(&self, filter: &ReportFilter) -> Report<DashboardStats> {
        match self.dashboard_stats_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("dashboard_stats degraded to empty result: {}", e);
                Report::degraded(DashboardStats::empty())
            }
        }
    }

    async fn dashboard_stats_inner(
        &self,
        filter: &ReportFilter,
    ) -> Result<Report<DashboardStats>, BoxError> {
        let invoices = queries::list_invoice_dims(&self.pool, filter).await?;
        if invoices.is_empty() {
            return Ok(Report::empty(DashboardStats::empty()));
        }

        let invoice_ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let lines = queries::list_line_categories(&self.pool, &invoice_ids, filter).await?;

        Ok(Report::ok(aggregate_dashboard_stats(&invoices, &lines)))
    }

    /// Top SKU 消费榜: 按SKU累加, 降序截断
    pub async fn top_skus_by_spend(&self, filter: &ReportFilter) -> Report<Vec<SkuSpend>> {
        match self.top_skus_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("top_skus_by_spend degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn top_skus_inner(
        &self,
        filter: &ReportFilter,
    ) -> Result<Report<Vec<SkuSpend>>, BoxError> {
        let invoice_ids = queries::list_invoice_ids(&self.pool, filter).await?;
        tracing::debug!("top_skus: {} invoices matched filters", invoice_ids.len());
        if invoice_ids.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let lines = queries::list_line_spend(&self.pool, &invoice_ids, filter).await?;
        let result = aggregate_top_skus(lines, filter.limit_or(DEFAULT_TOP_SKU_LIMIT));

        if result.is_empty() {
            Ok(Report::empty(result))
        } else {
            Ok(Report::ok(result))
        }
    }

    /// 门店×品类热力图 (两段查询都走缓存, 兜底为空集)
    pub async fn location_category_heat_map(&self, filter: &ReportFilter) -> Report<HeatMap> {
        match self.heat_map_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("location_category_heat_map degraded to empty result: {}", e);
                Report::degraded(HeatMap::empty())
            }
        }
    }

    async fn heat_map_inner(&self, filter: &ReportFilter) -> Result<Report<HeatMap>, BoxError> {
        // 缓存key必须用归一化后的生效过滤, 否则单值/数组两种写法会互相串缓存
        let invoices_key = format!(
            "location-heatmap-invoices-{:?}-{:?}-{:?}",
            filter.date_from,
            filter.date_to,
            filter.location_filter()
        );
        let invoices: Vec<InvoiceDimRow> = self
            .cache
            .fetch_with_retry(&invoices_key, FetchOptions::with_fallback(Vec::new()), || {
                let pool = self.pool.clone();
                let filter = filter.clone();
                async move { queries::list_invoice_dims(&pool, &filter).await.map(Some) }
            })
            .await?;

        if invoices.is_empty() {
            return Ok(Report::empty(HeatMap::empty()));
        }

        let invoice_ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let lines_key = format!(
            "location-heatmap-lines-{}-{:?}",
            invoice_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(","),
            filter.category_filter()
        );
        let lines: Vec<LineCategoryRow> = self
            .cache
            .fetch_with_retry(&lines_key, FetchOptions::with_fallback(Vec::new()), || {
                let pool = self.pool.clone();
                let filter = filter.clone();
                let invoice_ids = invoice_ids.clone();
                async move {
                    queries::list_line_categories(&pool, &invoice_ids, &filter)
                        .await
                        .map(Some)
                }
            })
            .await?;

        Ok(Report::ok(build_heat_map(&invoices, &lines)))
    }

    /// 品类金额波动 (只按日期过滤)
    pub async fn category_volatility(&self, filter: &ReportFilter) -> Report<Vec<CategoryVolatility>> {
        match self.volatility_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("category_volatility degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn volatility_inner(
        &self,
        filter: &ReportFilter,
    ) -> Result<Report<Vec<CategoryVolatility>>, BoxError> {
        let filter = filter.date_range_only();
        let invoice_ids = queries::list_invoice_ids(&self.pool, &filter).await?;
        if invoice_ids.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let lines = queries::list_line_categories(&self.pool, &invoice_ids, &filter).await?;
        let result = aggregate_volatility(lines);

        if result.is_empty() {
            Ok(Report::empty(result))
        } else {
            Ok(Report::ok(result))
        }
    }

    /// 月度品类消费趋势 (只按日期过滤)
    pub async fn category_spend_trend(&self, filter: &ReportFilter) -> Report<Vec<TrendRow>> {
        match self.trend_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("category_spend_trend degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn trend_inner(&self, filter: &ReportFilter) -> Result<Report<Vec<TrendRow>>, BoxError> {
        let filter = filter.date_range_only();
        let invoices = queries::list_invoice_dates(&self.pool, &filter).await?;
        if invoices.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let invoice_ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let lines = queries::list_line_categories(&self.pool, &invoice_ids, &filter).await?;
        let result = aggregate_trend(&invoices, &lines);

        if result.is_empty() {
            Ok(Report::empty(result))
        } else {
            Ok(Report::ok(result))
        }
    }

    /// 最贵发票 Top 20
    /// 有品类过滤时只保留至少一行命中该品类的发票
    pub async fn most_expensive_invoices(&self, filter: &ReportFilter) -> Report<Vec<InvoiceSummary>> {
        match self.most_expensive_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("most_expensive_invoices degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn most_expensive_inner(
        &self,
        filter: &ReportFilter,
    ) -> Result<Report<Vec<InvoiceSummary>>, BoxError> {
        let mut invoices = queries::list_invoice_summaries(&self.pool, filter).await?;
        tracing::debug!(
            "most_expensive: {} invoices after date/location filtering",
            invoices.len()
        );
        if invoices.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let category = filter.category_filter();
        if category != DimensionFilter::None {
            let invoice_ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
            let lines = queries::list_line_categories_lite(&self.pool, &invoice_ids).await?;
            let matching = invoice_ids_matching_category(&lines, &category);
            invoices.retain(|invoice| matching.contains(&invoice.id));
        }

        invoices.truncate(MOST_EXPENSIVE_LIMIT);

        if invoices.is_empty() {
            Ok(Report::empty(invoices))
        } else {
            Ok(Report::ok(invoices))
        }
    }

    /// SKU 补货节奏
    pub async fn sku_replenishment_cadence(
        &self,
        filter: &ReportFilter,
    ) -> Report<Vec<ReplenishmentCadence>> {
        match self.cadence_inner(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("sku_replenishment_cadence degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn cadence_inner(
        &self,
        filter: &ReportFilter,
    ) -> Result<Report<Vec<ReplenishmentCadence>>, BoxError> {
        let invoice_ids = queries::list_invoice_ids(&self.pool, filter).await?;
        if invoice_ids.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let lines = queries::list_line_cadence(&self.pool, &invoice_ids, filter, None).await?;
        let result = aggregate_cadence(lines);

        if result.is_empty() {
            Ok(Report::empty(result))
        } else {
            Ok(Report::ok(result))
        }
    }

    /// 按过滤条件查明细行 (回挂发票元数据, 按发票日期降序)
    pub async fn invoice_lines_by_filters(
        &self,
        filter: &ReportFilter,
    ) -> Report<Vec<JoinedInvoiceLine>> {
        match self.lines_inner(filter, None).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("invoice_lines_by_filters degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    /// 按 SKU + 过滤条件查明细行
    pub async fn invoice_lines_by_sku(
        &self,
        sku: &str,
        filter: &ReportFilter,
    ) -> Report<Vec<JoinedInvoiceLine>> {
        match self.lines_inner(filter, Some(sku)).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("invoice_lines_by_sku degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn lines_inner(
        &self,
        filter: &ReportFilter,
        sku: Option<&str>,
    ) -> Result<Report<Vec<JoinedInvoiceLine>>, BoxError> {
        let invoices = queries::list_invoice_refs(&self.pool, filter).await?;
        if invoices.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let invoice_ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let lines = queries::list_lines_full(&self.pool, &invoice_ids, filter, sku).await?;

        let mut joined = join_lines_with_invoices(lines, &invoices);
        if let Some(limit) = filter.limit {
            joined.truncate(limit as usize);
        }

        if joined.is_empty() {
            Ok(Report::empty(joined))
        } else {
            Ok(Report::ok(joined))
        }
    }

    /// 门店发票数统计 (带 ignore 明细的发票整票剔除)
    pub async fn cost_per_location(&self) -> Report<Vec<LocationCount>> {
        match self.cost_per_location_inner().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("cost_per_location degraded to empty result: {}", e);
                Report::degraded(Vec::new())
            }
        }
    }

    async fn cost_per_location_inner(&self) -> Result<Report<Vec<LocationCount>>, BoxError> {
        let invoices: Vec<InvoiceDimRow> = self
            .cache
            .fetch_with_retry(
                "cost-per-location-invoices",
                FetchOptions::with_fallback(Vec::new()),
                || {
                    let pool = self.pool.clone();
                    async move {
                        queries::list_invoice_dims(&pool, &ReportFilter::default())
                            .await
                            .map(Some)
                    }
                },
            )
            .await?;

        if invoices.is_empty() {
            return Ok(Report::empty(Vec::new()));
        }

        let invoice_ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let ignored: HashSet<i64> = queries::list_ignore_invoice_ids(&self.pool, &invoice_ids)
            .await?
            .into_iter()
            .collect();

        let mut counts: IndexMap<String, i64> = IndexMap::new();
        for invoice in &invoices {
            if ignored.contains(&invoice.id) {
                continue;
            }
            *counts.entry(invoice.location.clone()).or_insert(0) += 1;
        }

        let result: Vec<LocationCount> = counts
            .into_iter()
            .map(|(name, value)| LocationCount { name, value })
            .collect();

        if result.is_empty() {
            Ok(Report::empty(result))
        } else {
            Ok(Report::ok(result))
        }
    }

    /// 发票导出: 浏览结果拍平为一行明细一条记录
    pub async fn export_invoices(&self, filter: &ReportFilter) -> Report<Vec<InvoiceExportRow>> {
        let report = self.fetch_invoices(filter).await;
        let rows: Vec<InvoiceExportRow> = report
            .data
            .iter()
            .flat_map(|entry| {
                entry.lines.iter().map(|line| InvoiceExportRow {
                    invoice_id: entry.invoice.id,
                    invoice_date: entry.invoice.invoice_date,
                    source: entry.invoice.source.clone(),
                    location: entry.invoice.location.clone(),
                    status: entry.invoice.status.clone(),
                    description: line.description.clone(),
                    category: line.category.clone(),
                    line_total: line.line_total.clone(),
                    invoice_total: entry.invoice.invoice_total.clone(),
                })
            })
            .collect();

        Report {
            status: report.status,
            data: rows,
        }
    }
}

/// Top SKU 聚合: 按SKU累加 line_total, 描述/品类取首次出现值, 稳定降序截断
fn aggregate_top_skus(lines: Vec<LineSpendRow>, limit: usize) -> Vec<SkuSpend> {
    let mut by_sku: IndexMap<String, SkuSpend> = IndexMap::new();

    for line in lines {
        let entry = by_sku.entry(line.sku.clone()).or_insert_with(|| SkuSpend {
            sku: line.sku.clone(),
            description: line
                .description
                .clone()
                .unwrap_or_else(|| "No description".to_string()),
            category: line.category.clone().unwrap_or_else(|| "Unknown".to_string()),
            total: BigDecimal::from(0),
        });
        entry.total += line.line_total;
    }

    let mut result: Vec<SkuSpend> = by_sku.into_values().collect();
    result.sort_by(|a, b| b.total.cmp(&a.total));
    result.truncate(limit);
    result
}

/// 热力图聚合: 门店×品类全组合补0后按单元格累加
fn build_heat_map(invoices: &[InvoiceDimRow], lines: &[LineCategoryRow]) -> HeatMap {
    let invoice_location: HashMap<i64, &str> = invoices
        .iter()
        .map(|i| (i.id, i.location.as_str()))
        .collect();

    let locations: Vec<String> = invoices
        .iter()
        .map(|i| i.location.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let categories: Vec<String> = lines
        .iter()
        .map(|l| l.category.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // 先把所有组合置0, 保证缺失组合出现在结果里
    let mut spend: IndexMap<String, IndexMap<String, BigDecimal>> = locations
        .iter()
        .map(|location| {
            let row = categories
                .iter()
                .map(|category| (category.clone(), BigDecimal::from(0)))
                .collect();
            (location.clone(), row)
        })
        .collect();

    for line in lines {
        let Some(location) = invoice_location.get(&line.invoice_id) else {
            continue;
        };
        if let Some(row) = spend.get_mut(*location) {
            let cell = row
                .entry(line.category.clone())
                .or_insert_with(|| BigDecimal::from(0));
            *cell += &line.line_total;
        }
    }

    let data = spend
        .into_iter()
        .map(|(location, spend)| HeatMapRow { location, spend })
        .collect();

    HeatMap {
        locations,
        categories,
        data,
    }
}

/// 看板汇总聚合: 总额 + 按品类(名称去空白) + 按门店
fn aggregate_dashboard_stats(invoices: &[InvoiceDimRow], lines: &[LineCategoryRow]) -> DashboardStats {
    let invoice_location: HashMap<i64, &str> = invoices
        .iter()
        .map(|i| (i.id, i.location.as_str()))
        .collect();

    let mut total_expenses = BigDecimal::from(0);
    let mut expenses_by_category: IndexMap<String, BigDecimal> = IndexMap::new();
    let mut expenses_by_location: IndexMap<String, BigDecimal> = IndexMap::new();

    for line in lines {
        total_expenses += &line.line_total;

        let category = line.category.trim();
        if !category.is_empty() {
            *expenses_by_category
                .entry(category.to_string())
                .or_insert_with(|| BigDecimal::from(0)) += &line.line_total;
        }

        if let Some(location) = invoice_location.get(&line.invoice_id) {
            *expenses_by_location
                .entry((*location).to_string())
                .or_insert_with(|| BigDecimal::from(0)) += &line.line_total;
        }
    }

    DashboardStats {
        total_expenses,
        expenses_by_category,
        expenses_by_location,
    }
}

/// 单品类分位统计: q1/q3 用简化索引法 floor(n/4)/floor(3n/4), 偶数中位取中点均值
fn volatility_for(category: String, mut totals: Vec<BigDecimal>) -> CategoryVolatility {
    totals.sort();
    let n = totals.len();

    let min = totals[0].clone();
    let max = totals[n - 1].clone();
    let q1 = totals[n / 4].clone();
    let q3 = totals[n * 3 / 4].clone();
    let median = if n % 2 == 0 {
        (&totals[n / 2 - 1] + &totals[n / 2]) / BigDecimal::from(2)
    } else {
        totals[n / 2].clone()
    };
    let sum = totals
        .iter()
        .fold(BigDecimal::from(0), |acc, value| acc + value);
    let mean = sum / BigDecimal::from(n as i64);

    CategoryVolatility {
        category,
        min,
        q1,
        median,
        q3,
        max,
        mean,
    }
}

/// 品类波动聚合: 按品类收集 line_total 后逐组统计
fn aggregate_volatility(lines: Vec<LineCategoryRow>) -> Vec<CategoryVolatility> {
    let mut by_category: IndexMap<String, Vec<BigDecimal>> = IndexMap::new();
    for line in lines {
        by_category
            .entry(line.category)
            .or_default()
            .push(line.line_total);
    }

    by_category
        .into_iter()
        .map(|(category, totals)| volatility_for(category, totals))
        .collect()
}

/// 补货节奏聚合: 平均间隔 = 相邻采购间隔天数之和 / (采购次数 - 1)
fn aggregate_cadence(lines: Vec<LineCadenceRow>) -> Vec<ReplenishmentCadence> {
    struct SkuPurchases {
        description: String,
        timestamps: Vec<chrono::DateTime<chrono::Utc>>,
    }

    let mut by_sku: IndexMap<String, SkuPurchases> = IndexMap::new();
    for line in lines {
        let entry = by_sku.entry(line.sku.clone()).or_insert_with(|| SkuPurchases {
            description: line
                .description
                .clone()
                .unwrap_or_else(|| "No description".to_string()),
            timestamps: Vec::new(),
        });
        entry.timestamps.push(line.created_at);
    }

    by_sku
        .into_iter()
        .map(|(sku, mut purchases)| {
            purchases.timestamps.sort();
            let purchase_count = purchases.timestamps.len();
            let avg_days_between = if purchase_count > 1 {
                let total_days: f64 = purchases
                    .timestamps
                    .windows(2)
                    .map(|pair| (pair[1] - pair[0]).num_seconds() as f64 / 86_400.0)
                    .sum();
                Some(total_days / (purchase_count - 1) as f64)
            } else {
                None
            };

            ReplenishmentCadence {
                sku,
                description: purchases.description,
                avg_days_between,
                purchase_count,
            }
        })
        .collect()
}

/// 月度趋势聚合: 按发票日期的 YYYY-MM 分桶, 桶内按品类累加
fn aggregate_trend(invoices: &[InvoiceDateRow], lines: &[LineCategoryRow]) -> Vec<TrendRow> {
    let invoice_month: HashMap<i64, String> = invoices
        .iter()
        .map(|i| (i.id, i.invoice_date.format("%Y-%m").to_string()))
        .collect();

    let mut monthly: IndexMap<String, IndexMap<String, BigDecimal>> = IndexMap::new();
    for line in lines {
        let Some(month) = invoice_month.get(&line.invoice_id) else {
            continue;
        };
        *monthly
            .entry(month.clone())
            .or_default()
            .entry(line.category.clone())
            .or_insert_with(|| BigDecimal::from(0)) += &line.line_total;
    }

    let mut rows: Vec<TrendRow> = monthly
        .into_iter()
        .map(|(month, categories)| TrendRow { month, categories })
        .collect();
    rows.sort_by(|a, b| a.month.cmp(&b.month));
    rows
}

/// 品类过滤命中的发票ID: 单值大小写不敏感包含, 集合精确命中
fn invoice_ids_matching_category(
    lines: &[LineCategoryLite],
    category: &DimensionFilter,
) -> HashSet<i64> {
    let mut matching = HashSet::new();
    match category {
        DimensionFilter::None => {}
        DimensionFilter::Like(value) => {
            let needle = value.to_lowercase();
            for line in lines {
                if let Some(cat) = &line.category {
                    if cat.to_lowercase().contains(&needle) {
                        matching.insert(line.invoice_id);
                    }
                }
            }
        }
        DimensionFilter::AnyOf(values) => {
            for line in lines {
                if let Some(cat) = &line.category {
                    if values.iter().any(|v| v == cat) {
                        matching.insert(line.invoice_id);
                    }
                }
            }
        }
    }
    matching
}

/// 明细行回挂发票元数据, 按发票日期降序; 找不到所属发票的行丢弃
fn join_lines_with_invoices(
    lines: Vec<InvoiceLine>,
    invoices: &[InvoiceRef],
) -> Vec<JoinedInvoiceLine> {
    let by_id: HashMap<i64, &InvoiceRef> = invoices.iter().map(|i| (i.id, i)).collect();

    let mut joined: Vec<JoinedInvoiceLine> = lines
        .into_iter()
        .filter_map(|line| {
            by_id.get(&line.invoice_id).map(|invoice| JoinedInvoiceLine {
                invoice_date: invoice.invoice_date,
                invoice_number: invoice.invoice_number.clone(),
                source: invoice.source.clone(),
                location: invoice.location.clone(),
                pdf_url: invoice.pdf_url.clone(),
                line,
            })
        })
        .collect();

    joined.sort_by(|a, b| b.invoice_date.cmp(&a.invoice_date));
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn dec(value: i64) -> BigDecimal {
        BigDecimal::from(value)
    }

    fn spend_row(sku: &str, description: &str, category: &str, total: i64) -> LineSpendRow {
        LineSpendRow {
            sku: sku.to_string(),
            description: Some(description.to_string()),
            category: Some(category.to_string()),
            line_total: dec(total),
        }
    }

    fn category_row(invoice_id: i64, category: &str, total: i64) -> LineCategoryRow {
        LineCategoryRow {
            invoice_id,
            category: category.to_string(),
            line_total: dec(total),
        }
    }

    fn dim_row(id: i64, location: &str) -> InvoiceDimRow {
        InvoiceDimRow {
            id,
            location: location.to_string(),
        }
    }

    fn cadence_row(sku: &str, year: i32, month: u32, day: u32) -> LineCadenceRow {
        LineCadenceRow {
            invoice_id: 1,
            sku: sku.to_string(),
            description: Some("Presoak".to_string()),
            category: "Chemical".to_string(),
            qty: None,
            created_at: Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn top_skus_sorted_descending_and_truncated() {
        let lines = vec![
            spend_row("P200", "Foam brush", "Equipment", 400),
            spend_row("P100", "Presoak", "Chemical", 300),
            spend_row("P100", "Presoak", "Chemical", 200),
            spend_row("P300", "Towels", "Supplies", 100),
        ];

        let result = aggregate_top_skus(lines, 2);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].sku, "P100");
        assert_eq!(result[0].total, dec(500));
        assert_eq!(result[1].sku, "P200");
        assert_eq!(result[1].total, dec(400));
    }

    #[test]
    fn top_skus_conserve_total_spend() {
        let lines = vec![
            spend_row("P100", "Presoak", "Chemical", 300),
            spend_row("P200", "Foam brush", "Equipment", 400),
            spend_row("P100", "Presoak", "Chemical", 200),
        ];
        let input_sum: BigDecimal = lines
            .iter()
            .fold(dec(0), |acc, line| acc + &line.line_total);

        let result = aggregate_top_skus(lines, 100);
        let output_sum: BigDecimal = result.iter().fold(dec(0), |acc, row| acc + &row.total);

        assert_eq!(input_sum, output_sum);
    }

    #[test]
    fn top_skus_keep_first_seen_description_and_default_missing() {
        let lines = vec![
            LineSpendRow {
                sku: "P100".to_string(),
                description: None,
                category: None,
                line_total: dec(100),
            },
            spend_row("P100", "Presoak gallon", "Chemical", 50),
        ];

        let result = aggregate_top_skus(lines, 10);

        assert_eq!(result[0].description, "No description");
        assert_eq!(result[0].category, "Unknown");
        assert_eq!(result[0].total, dec(150));
    }

    // 过滤范围内单票单行的端到端聚合
    #[test]
    fn top_skus_single_line_scenario() {
        let lines = vec![spend_row("P100", "Presoak", "Chemical", 500)];

        let result = aggregate_top_skus(lines, 20);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].sku, "P100");
        assert_eq!(result[0].total, dec(500));
    }

    #[test]
    fn heat_map_zero_fills_missing_combinations() {
        let invoices = vec![dim_row(1, "Eastlake"), dim_row(2, "Westside")];
        let lines = vec![category_row(1, "Chemical", 100)];

        let map = build_heat_map(&invoices, &lines);

        assert_eq!(map.locations, vec!["Eastlake", "Westside"]);
        assert_eq!(map.categories, vec!["Chemical"]);
        let westside = map.data.iter().find(|r| r.location == "Westside").unwrap();
        assert_eq!(westside.spend["Chemical"], dec(0));
    }

    #[test]
    fn heat_map_accumulates_per_cell() {
        let invoices = vec![dim_row(1, "Eastlake"), dim_row(2, "Eastlake")];
        let lines = vec![
            category_row(1, "Chemical", 100),
            category_row(2, "Chemical", 250),
            category_row(2, "Equipment", 40),
        ];

        let map = build_heat_map(&invoices, &lines);

        let eastlake = map.data.iter().find(|r| r.location == "Eastlake").unwrap();
        assert_eq!(eastlake.spend["Chemical"], dec(350));
        assert_eq!(eastlake.spend["Equipment"], dec(40));
    }

    #[test]
    fn volatility_quartiles_are_ordered() {
        let lines = vec![
            category_row(1, "Chemical", 40),
            category_row(1, "Chemical", 10),
            category_row(1, "Chemical", 30),
            category_row(1, "Chemical", 20),
            category_row(1, "Chemical", 50),
        ];

        let result = aggregate_volatility(lines);
        let stats = &result[0];

        assert!(stats.min <= stats.q1);
        assert!(stats.q1 <= stats.median);
        assert!(stats.median <= stats.q3);
        assert!(stats.q3 <= stats.max);
    }

    #[test]
    fn volatility_even_count_uses_midpoint_median() {
        let lines = vec![
            category_row(1, "Chemical", 1),
            category_row(1, "Chemical", 2),
            category_row(1, "Chemical", 3),
            category_row(1, "Chemical", 4),
        ];

        let stats = &aggregate_volatility(lines)[0];

        // 排序后 [1,2,3,4]: q1=v[1], q3=v[3], 中位 (2+3)/2
        assert_eq!(stats.min, dec(1));
        assert_eq!(stats.q1, dec(2));
        assert_eq!(stats.median, dec(5) / dec(2));
        assert_eq!(stats.q3, dec(4));
        assert_eq!(stats.max, dec(4));
        assert_eq!(stats.mean, dec(10) / dec(4));
    }

    #[test]
    fn volatility_odd_count_uses_middle_element() {
        let lines = vec![
            category_row(1, "Labor", 30),
            category_row(1, "Labor", 10),
            category_row(1, "Labor", 20),
        ];

        let stats = &aggregate_volatility(lines)[0];

        assert_eq!(stats.median, dec(20));
        assert_eq!(stats.mean, dec(20));
    }

    #[test]
    fn cadence_single_purchase_has_null_average() {
        let lines = vec![cadence_row("P100", 2024, 1, 5)];

        let result = aggregate_cadence(lines);

        assert_eq!(result[0].purchase_count, 1);
        assert_eq!(result[0].avg_days_between, None);
    }

    #[test]
    fn cadence_two_purchases_n_days_apart() {
        let lines = vec![cadence_row("P100", 2024, 1, 5), cadence_row("P100", 2024, 1, 15)];

        let result = aggregate_cadence(lines);

        assert_eq!(result[0].purchase_count, 2);
        assert_eq!(result[0].avg_days_between, Some(10.0));
    }

    #[test]
    fn cadence_sorts_unordered_timestamps() {
        let lines = vec![
            cadence_row("P100", 2024, 1, 11),
            cadence_row("P100", 2024, 1, 1),
            cadence_row("P100", 2024, 1, 6),
        ];

        let result = aggregate_cadence(lines);

        // 排序后间隔 5 + 5, 平均 5
        assert_eq!(result[0].avg_days_between, Some(5.0));
    }

    #[test]
    fn dashboard_stats_totals_and_trimmed_categories() {
        let invoices = vec![dim_row(1, "Eastlake"), dim_row(2, "Westside")];
        let lines = vec![
            category_row(1, "Chemical", 100),
            category_row(2, " Chemical ", 50),
            category_row(2, "Equipment", 25),
        ];

        let stats = aggregate_dashboard_stats(&invoices, &lines);

        assert_eq!(stats.total_expenses, dec(175));
        assert_eq!(stats.expenses_by_category["Chemical"], dec(150));
        assert_eq!(stats.expenses_by_category["Equipment"], dec(25));
        assert_eq!(stats.expenses_by_location["Eastlake"], dec(100));
        assert_eq!(stats.expenses_by_location["Westside"], dec(75));
    }

    #[test]
    fn trend_rows_bucketed_by_month_and_sorted() {
        let invoices = vec![
            InvoiceDateRow {
                id: 1,
                invoice_date: NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(),
            },
            InvoiceDateRow {
                id: 2,
                invoice_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            },
        ];
        let lines = vec![
            category_row(1, "Chemical", 200),
            category_row(2, "Chemical", 100),
        ];

        let rows = aggregate_trend(&invoices, &lines);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].month, "2024-01");
        assert_eq!(rows[0].categories["Chemical"], dec(100));
        assert_eq!(rows[1].month, "2024-02");
    }

    #[test]
    fn category_matching_is_case_insensitive_substring() {
        let lines = vec![
            LineCategoryLite {
                invoice_id: 1,
                category: Some("Chemical".to_string()),
            },
            LineCategoryLite {
                invoice_id: 2,
                category: Some("equipment".to_string()),
            },
            LineCategoryLite {
                invoice_id: 3,
                category: None,
            },
        ];

        let matching =
            invoice_ids_matching_category(&lines, &DimensionFilter::Like("chem".to_string()));

        assert!(matching.contains(&1));
        assert!(!matching.contains(&2));
        assert!(!matching.contains(&3));
    }

    #[test]
    fn joined_lines_sorted_by_invoice_date_desc() {
        let invoices = vec![
            InvoiceRef {
                id: 1,
                invoice_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                invoice_number: None,
                source: "CleanCo".to_string(),
                location: "Eastlake".to_string(),
                pdf_url: None,
            },
            InvoiceRef {
                id: 2,
                invoice_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                invoice_number: None,
                source: "SoapWorks".to_string(),
                location: "Westside".to_string(),
                pdf_url: None,
            },
        ];
        let line = |id: i64, invoice_id: i64| InvoiceLine {
            id,
            invoice_id,
            line_number: 1,
            sku: "P100".to_string(),
            description: None,
            uom: None,
            qty: None,
            unit_price: None,
            line_total: dec(10),
            tax: None,
            category: "Chemical".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
        };
        // 属于未知发票的行被丢弃
        let lines = vec![line(1, 1), line(2, 2), line(3, 99)];

        let joined = join_lines_with_invoices(lines, &invoices);

        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].line.invoice_id, 2);
        assert_eq!(joined[1].line.invoice_id, 1);
    }

    #[test]
    fn aggregation_is_idempotent_over_same_input() {
        let lines = vec![
            spend_row("P100", "Presoak", "Chemical", 300),
            spend_row("P200", "Foam brush", "Equipment", 400),
        ];

        let first = aggregate_top_skus(lines.clone(), 10);
        let second = aggregate_top_skus(lines, 10);

        assert_eq!(first, second);
    }
}
