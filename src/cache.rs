use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};

/// 默认缓存存活时长: 5分钟
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// 默认最大尝试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// 默认退避基准间隔
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// 单次查询的缓存/重试选项, None 字段用缓存实例的默认值
pub struct FetchOptions<T> {
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub cache_ttl: Option<Duration>,
    /// 全部尝试失败时的兜底数据 (允许空集合)
    pub fallback: Option<T>,
}

impl<T> Default for FetchOptions<T> {
    fn default() -> Self {
        Self {
            max_retries: None,
            retry_delay: None,
            cache_ttl: None,
            fallback: None,
        }
    }
}

impl<T> FetchOptions<T> {
    /// 只配兜底数据, 其余用默认
    pub fn with_fallback(fallback: T) -> Self {
        Self {
            fallback: Some(fallback),
            ..Self::default()
        }
    }
}

/// 重试耗尽且无兜底数据
#[derive(Debug)]
pub struct FetchExhausted {
    pub key: String,
    pub attempts: u32,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for FetchExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "all {} attempts failed for cache key '{}'",
            self.attempts, self.key
        )
    }
}

impl std::error::Error for FetchExhausted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

struct CacheEntry {
    value: serde_json::Value,
    stored_at: Instant,
}

/// 进程级查询缓存: TTL + 指数退避重试
/// 显式构造后注入服务层, 不做全局单例; 同key并发回源时后写覆盖先写, 无害
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
    default_max_retries: u32,
    default_retry_delay: Duration,
}

impl QueryCache {
    pub fn new(default_ttl: Duration, default_max_retries: u32, default_retry_delay: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            default_max_retries,
            default_retry_delay,
        }
    }

    /// 带缓存和重试的查询包装
    /// 1. 缓存未过期直接返回, 不回源
    /// 2. 回源最多 max_retries 次, 第n次(n>=2)前等待 retry_delay * 2^(n-2)
    /// 3. 返回 Err 或 Ok(None) 都算一次失败
    /// 4. 首次成功后以JSON值落缓存
    /// 5. 全部失败时返回 fallback, 无兜底则报 FetchExhausted
    pub async fn fetch_with_retry<T, E, F, Fut>(
        &self,
        key: &str,
        options: FetchOptions<T>,
        fetch: F,
    ) -> Result<T, FetchExhausted>
    where
        T: Serialize + DeserializeOwned,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>, E>>,
    {
        let ttl = options.cache_ttl.unwrap_or(self.default_ttl);
        let max_retries = options.max_retries.unwrap_or(self.default_max_retries);
        let retry_delay = options.retry_delay.unwrap_or(self.default_retry_delay);

        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at.elapsed() < ttl {
                if let Ok(value) = serde_json::from_value(entry.value.clone()) {
                    tracing::debug!("Using cached data for {}", key);
                    return Ok(value);
                }
            }
        }

        let mut last_error: Option<Box<dyn std::error::Error + Send + Sync>> = None;

        for attempt in 1..=max_retries {
            if attempt > 1 {
                // 指数退避: 1s, 2s, 4s, ...
                let backoff = retry_delay * 2u32.pow(attempt - 2);
                tracing::info!(
                    "Retry attempt {}/{} for {} after {:?} delay",
                    attempt,
                    max_retries,
                    key,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }

            match fetch().await {
                Ok(Some(data)) => {
                    match serde_json::to_value(&data) {
                        Ok(value) => {
                            self.entries.insert(
                                key.to_string(),
                                CacheEntry {
                                    value,
                                    stored_at: Instant::now(),
                                },
                            );
                        }
                        Err(e) => {
                            tracing::warn!("Skipping cache store for {}: {}", key, e);
                        }
                    }
                    return Ok(data);
                }
                Ok(None) => {
                    tracing::warn!(
                        "No data returned on attempt {}/{} for {}",
                        attempt,
                        max_retries,
                        key
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Error on attempt {}/{} for {}: {}",
                        attempt,
                        max_retries,
                        key,
                        e
                    );
                    last_error = Some(Box::new(e));
                }
            }
        }

        tracing::error!(
            "All {} attempts failed for {}. Using fallback data.",
            max_retries,
            key
        );

        if let Some(fallback) = options.fallback {
            return Ok(fallback);
        }

        Err(FetchExhausted {
            key: key.to_string(),
            attempts: max_retries,
            source: last_error,
        })
    }

    /// 清除指定key, 不传则清空
    pub fn clear(&self, key: Option<&str>) {
        match key {
            Some(k) => {
                self.entries.remove(k);
            }
            None => self.entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    type TestResult = Result<Option<Vec<i32>>, std::io::Error>;

    fn io_err(msg: &str) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, msg.to_string())
    }

    fn quick_options() -> FetchOptions<Vec<i32>> {
        FetchOptions {
            retry_delay: Some(Duration::from_millis(1)),
            ..FetchOptions::default()
        }
    }

    #[tokio::test]
    async fn second_call_within_ttl_skips_fetch() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            TestResult::Ok(Some(vec![1, 2, 3]))
        };

        let first = cache
            .fetch_with_retry("k", quick_options(), fetch)
            .await
            .unwrap();
        let second = cache
            .fetch_with_retry("k", quick_options(), fetch)
            .await
            .unwrap();

        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let options = || FetchOptions {
            cache_ttl: Some(Duration::from_millis(20)),
            ..quick_options()
        };
        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            TestResult::Ok(Some(vec![7]))
        };

        cache.fetch_with_retry("k", options(), fetch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.fetch_with_retry("k", options(), fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let fetch = || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                TestResult::Err(io_err("connection reset"))
            } else {
                TestResult::Ok(Some(vec![42]))
            }
        };

        let data = cache
            .fetch_with_retry("k", quick_options(), fetch)
            .await
            .unwrap();

        assert_eq!(data, vec![42]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fallback_is_returned_after_exhaustion() {
        let cache = QueryCache::default();

        let options = FetchOptions {
            fallback: Some(Vec::new()),
            ..quick_options()
        };
        let data = cache
            .fetch_with_retry("k", options, || async {
                TestResult::Err(io_err("down"))
            })
            .await
            .unwrap();

        // 空集合兜底同样生效
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn exhaustion_without_fallback_reports_last_error() {
        let cache = QueryCache::default();

        let err = cache
            .fetch_with_retry("bad-key", quick_options(), || async {
                TestResult::Err(io_err("down"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.key, "bad-key");
        assert!(err.source.is_some());
    }

    #[tokio::test]
    async fn null_payload_counts_as_failed_attempt() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let err = cache
            .fetch_with_retry("k", quick_options(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                TestResult::Ok(None)
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.source.is_none());
    }

    #[tokio::test]
    async fn clear_forces_refetch() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            TestResult::Ok(Some(vec![1]))
        };

        cache.fetch_with_retry("k", quick_options(), fetch).await.unwrap();
        cache.clear(Some("k"));
        cache.fetch_with_retry("k", quick_options(), fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
