use crate::cache::{FetchOptions, QueryCache};
use crate::db::queries;
use crate::models::SkuCatalogEntry;
use sqlx::PgPool;
use std::sync::Arc;

/// 过滤下拉框目录服务 (门店/品类/SKU 去重清单)
pub struct CatalogService {
    pool: PgPool,
    cache: Arc<QueryCache>,
}

impl CatalogService {
    pub fn new(pool: PgPool, cache: Arc<QueryCache>) -> Self {
        Self { pool, cache }
    }

    /// 全部门店 (走缓存, 全部失败时给占位门店兜底)
    pub async fn all_locations(&self) -> Vec<String> {
        let fallback = vec![
            "Location 1".to_string(),
            "Location 2".to_string(),
            "Location 3".to_string(),
        ];

        self.cache
            .fetch_with_retry("all-locations", FetchOptions::with_fallback(fallback), || {
                let pool = self.pool.clone();
                async move { queries::list_distinct_locations(&pool).await.map(Some) }
            })
            .await
            // 配了兜底数据就不会走到这里
            .unwrap_or_default()
    }

    /// 全部品类 (ignore 剔除, 失败降级为空)
    pub async fn all_categories(&self) -> Vec<String> {
        match queries::list_distinct_categories(&self.pool).await {
            Ok(categories) => categories,
            Err(e) => {
                tracing::error!("all_categories degraded to empty result: {}", e);
                Vec::new()
            }
        }
    }

    /// SKU 目录 (失败降级为空)
    pub async fn all_skus(&self) -> Vec<SkuCatalogEntry> {
        match queries::list_sku_catalog(&self.pool).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("all_skus degraded to empty result: {}", e);
                Vec::new()
            }
        }
    }
}
