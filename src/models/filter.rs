use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 前端下拉框的"全部"哨兵值, 等同于不过滤
pub const ALL_LOCATIONS: &str = "All Locations";
pub const ALL_CATEGORIES: &str = "All Categories";

/// 报表过滤条件 (请求级值对象, 所有字段可选, 缺省即不限制)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub location: Option<String>,
    pub locations: Option<Vec<String>>,
    pub category: Option<String>,
    pub categories: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub sku: Option<String>,
    pub search: Option<String>,
}

/// 维度过滤的生效形式
/// 单值 -> ILIKE 模糊匹配; 多值 -> = ANY 精确匹配
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionFilter {
    None,
    Like(String),
    AnyOf(Vec<String>),
}

/// 归一化单值+多值两种写法:
/// 1. 单值优先于数组; 哨兵值视为不过滤
/// 2. 数组先剔除空串和哨兵值, 剩1个降级为单值模糊匹配, 多个用精确集合匹配
fn resolve_dimension(
    singular: Option<&str>,
    plural: Option<&[String]>,
    sentinel: &str,
) -> DimensionFilter {
    if let Some(value) = singular {
        let value = value.trim();
        if !value.is_empty() {
            if value == sentinel {
                return DimensionFilter::None;
            }
            return DimensionFilter::Like(value.to_string());
        }
    }

    let mut valid: Vec<String> = plural
        .unwrap_or(&[])
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != sentinel)
        .map(|v| v.to_string())
        .collect();

    match valid.len() {
        0 => DimensionFilter::None,
        1 => DimensionFilter::Like(valid.remove(0)),
        _ => DimensionFilter::AnyOf(valid),
    }
}

impl ReportFilter {
    /// 门店维度的生效过滤
    pub fn location_filter(&self) -> DimensionFilter {
        resolve_dimension(
            self.location.as_deref(),
            self.locations.as_deref(),
            ALL_LOCATIONS,
        )
    }

    /// 品类维度的生效过滤
    pub fn category_filter(&self) -> DimensionFilter {
        resolve_dimension(
            self.category.as_deref(),
            self.categories.as_deref(),
            ALL_CATEGORIES,
        )
    }

    /// 截断行数, 未指定时用调用方默认值
    pub fn limit_or(&self, default: usize) -> usize {
        self.limit.map(|l| l as usize).unwrap_or(default)
    }

    /// 仅保留日期区间的子过滤 (品类波动/月度趋势只按日期过滤)
    pub fn date_range_only(&self) -> ReportFilter {
        ReportFilter {
            date_from: self.date_from,
            date_to: self.date_to,
            ..ReportFilter::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_with(
        location: Option<&str>,
        locations: Option<Vec<&str>>,
    ) -> ReportFilter {
        ReportFilter {
            location: location.map(String::from),
            locations: locations.map(|v| v.into_iter().map(String::from).collect()),
            ..ReportFilter::default()
        }
    }

    #[test]
    fn singular_location_takes_precedence_over_array() {
        let f = filter_with(Some("Eastlake"), Some(vec!["Westside", "Northtown"]));
        assert_eq!(f.location_filter(), DimensionFilter::Like("Eastlake".into()));
    }

    #[test]
    fn sentinel_means_no_filter() {
        let f = filter_with(Some(ALL_LOCATIONS), None);
        assert_eq!(f.location_filter(), DimensionFilter::None);

        let f = filter_with(None, Some(vec![ALL_LOCATIONS]));
        assert_eq!(f.location_filter(), DimensionFilter::None);
    }

    #[test]
    fn single_element_array_collapses_to_like() {
        let f = filter_with(None, Some(vec!["Eastlake"]));
        assert_eq!(f.location_filter(), DimensionFilter::Like("Eastlake".into()));
    }

    #[test]
    fn multi_element_array_uses_exact_set() {
        let f = filter_with(None, Some(vec!["Eastlake", "", ALL_LOCATIONS, "Westside"]));
        assert_eq!(
            f.location_filter(),
            DimensionFilter::AnyOf(vec!["Eastlake".into(), "Westside".into()])
        );
    }

    #[test]
    fn empty_singular_falls_through_to_array() {
        let f = filter_with(Some("  "), Some(vec!["Westside"]));
        assert_eq!(f.location_filter(), DimensionFilter::Like("Westside".into()));
    }

    #[test]
    fn camel_case_body_deserializes() {
        let f: ReportFilter = serde_json::from_str(
            r#"{"dateFrom":"2024-01-01","dateTo":"2024-01-31","category":"Chemical","limit":20}"#,
        )
        .unwrap();
        assert_eq!(f.date_from, Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert_eq!(f.date_to, Some(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
        assert_eq!(f.category_filter(), DimensionFilter::Like("Chemical".into()));
        assert_eq!(f.limit_or(100), 20);
    }
}
