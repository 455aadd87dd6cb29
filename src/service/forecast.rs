use crate::db::queries;
use crate::models::{InventoryForecast, LineCadenceRow, ReportFilter, SkuDemandForecast};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use sqlx::PgPool;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 库存预测服务
/// 基于补货节奏外推: 下次采购 = 最近一次采购 + 平均间隔
pub struct ForecastService {
    pool: PgPool,
}

struct SkuSeries {
    description: String,
    timestamps: Vec<DateTime<Utc>>,
    qty_sum: BigDecimal,
    qty_count: usize,
}

impl ForecastService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按过滤条件的库存预测: 每个至少采购两次的SKU给出下次采购预估
    pub async fn forecast_inventory(
        &self,
        filter: &ReportFilter,
    ) -> Result<Vec<InventoryForecast>, BoxError> {
        let invoice_ids = queries::list_invoice_ids(&self.pool, filter).await?;
        if invoice_ids.is_empty() {
            return Ok(Vec::new());
        }

        let lines = queries::list_line_cadence(&self.pool, &invoice_ids, filter, None).await?;

        let mut result: Vec<InventoryForecast> = group_by_sku(lines)
            .into_iter()
            .filter_map(|(sku, series)| {
                let (count, avg, last) = series_stats(&series)?;
                let avg = avg?;
                Some(InventoryForecast {
                    sku,
                    description: series.description,
                    purchase_count: count,
                    avg_days_between: avg,
                    last_purchase: last,
                    next_expected: project_next(last, avg),
                })
            })
            .collect();

        // 最先到期的排前面
        result.sort_by_key(|f| f.next_expected);
        Ok(result)
    }

    /// 单 SKU 需求预测: 节奏外推 + 平均单次采购量
    pub async fn forecast_sku_demand(
        &self,
        sku: &str,
        filter: &ReportFilter,
    ) -> Result<SkuDemandForecast, BoxError> {
        let invoice_ids = queries::list_invoice_ids(&self.pool, filter).await?;
        let lines = if invoice_ids.is_empty() {
            Vec::new()
        } else {
            queries::list_line_cadence(&self.pool, &invoice_ids, filter, Some(sku)).await?
        };

        Ok(demand_from_lines(sku, lines))
    }
}

/// 按 SKU 收集采购序列
fn group_by_sku(lines: Vec<LineCadenceRow>) -> IndexMap<String, SkuSeries> {
    let mut by_sku: IndexMap<String, SkuSeries> = IndexMap::new();
    for line in lines {
        let entry = by_sku.entry(line.sku.clone()).or_insert_with(|| SkuSeries {
            description: line
                .description
                .clone()
                .unwrap_or_else(|| "No description".to_string()),
            timestamps: Vec::new(),
            qty_sum: BigDecimal::from(0),
            qty_count: 0,
        });
        entry.timestamps.push(line.created_at);
        if let Some(qty) = line.qty {
            entry.qty_sum += qty;
            entry.qty_count += 1;
        }
    }
    by_sku
}

/// 序列统计: (采购次数, 平均间隔天数, 最近采购时间)
fn series_stats(series: &SkuSeries) -> Option<(usize, Option<f64>, DateTime<Utc>)> {
    let mut timestamps = series.timestamps.clone();
    timestamps.sort();

    let count = timestamps.len();
    let last = *timestamps.last()?;
    let avg = if count > 1 {
        let total_days: f64 = timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_seconds() as f64 / 86_400.0)
            .sum();
        Some(total_days / (count - 1) as f64)
    } else {
        None
    };

    Some((count, avg, last))
}

/// 下次采购时间 = 最近一次 + 平均间隔
fn project_next(last: DateTime<Utc>, avg_days: f64) -> DateTime<Utc> {
    last + Duration::seconds((avg_days * 86_400.0) as i64)
}

fn demand_from_lines(sku: &str, lines: Vec<LineCadenceRow>) -> SkuDemandForecast {
    let mut grouped = group_by_sku(lines);

    // 模糊匹配可能带出多个SKU, 合并成请求SKU的一条序列
    let mut merged: Option<SkuSeries> = None;
    for (_, series) in grouped.drain(..) {
        match &mut merged {
            None => merged = Some(series),
            Some(m) => {
                m.timestamps.extend(series.timestamps);
                m.qty_sum += series.qty_sum;
                m.qty_count += series.qty_count;
            }
        }
    }

    let stats = merged
        .as_ref()
        .and_then(|series| series_stats(series));
    let (Some(series), Some((count, avg, last))) = (merged, stats) else {
        return SkuDemandForecast {
            sku: sku.to_string(),
            description: "No description".to_string(),
            purchase_count: 0,
            avg_days_between: None,
            avg_qty_per_purchase: None,
            last_purchase: None,
            next_expected: None,
        };
    };
    let avg_qty = if series.qty_count > 0 {
        Some(&series.qty_sum / BigDecimal::from(series.qty_count as i64))
    } else {
        None
    };

    SkuDemandForecast {
        sku: sku.to_string(),
        description: series.description,
        purchase_count: count,
        avg_days_between: avg,
        avg_qty_per_purchase: avg_qty,
        last_purchase: Some(last),
        next_expected: avg.map(|a| project_next(last, a)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cadence_row(sku: &str, day: u32, qty: Option<i64>) -> LineCadenceRow {
        LineCadenceRow {
            invoice_id: 1,
            sku: sku.to_string(),
            description: Some("Presoak".to_string()),
            category: "Chemical".to_string(),
            qty: qty.map(BigDecimal::from),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn demand_with_no_purchases_is_all_null() {
        let forecast = demand_from_lines("P100", Vec::new());

        assert_eq!(forecast.purchase_count, 0);
        assert_eq!(forecast.avg_days_between, None);
        assert_eq!(forecast.last_purchase, None);
        assert_eq!(forecast.next_expected, None);
    }

    #[test]
    fn demand_projects_next_purchase_from_cadence() {
        let lines = vec![cadence_row("P100", 1, Some(4)), cadence_row("P100", 11, Some(6))];

        let forecast = demand_from_lines("P100", lines);

        assert_eq!(forecast.purchase_count, 2);
        assert_eq!(forecast.avg_days_between, Some(10.0));
        assert_eq!(
            forecast.next_expected,
            Some(Utc.with_ymd_and_hms(2024, 1, 21, 0, 0, 0).unwrap())
        );
        assert_eq!(forecast.avg_qty_per_purchase, Some(BigDecimal::from(5)));
    }

    #[test]
    fn single_purchase_has_no_projection() {
        let lines = vec![cadence_row("P100", 5, None)];

        let forecast = demand_from_lines("P100", lines);

        assert_eq!(forecast.purchase_count, 1);
        assert_eq!(forecast.avg_days_between, None);
        assert!(forecast.last_purchase.is_some());
        assert_eq!(forecast.next_expected, None);
        assert_eq!(forecast.avg_qty_per_purchase, None);
    }
}
