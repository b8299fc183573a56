//! 瞬时错误重试
//!
//! 参考服务和基础设施的调用契约是固定的倍增退避：首次重试前等 1 秒，
//! 之后每次翻倍（1s、2s、4s），最多补偿 3 次。错误是否值得重试由
//! [`OrderError::is_transient`] 统一判定，永久性错误（404、消息非法）
//! 第一次就向上传播。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::OrderError;

/// 退避倍增的位移上限，防止把 Duration 乘法推到溢出
const MAX_BACKOFF_SHIFT: u32 = 10;

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略
// ---------------------------------------------------------------------------

/// 重试策略
///
/// 只有两个自由度：补偿次数和基准等待时间。退避固定为逐次翻倍，
/// 与参考服务客户端的调用契约一致，不做抖动。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次执行之外允许的补偿次数
    pub max_retries: u32,
    /// 首次重试前的等待时间，之后逐次翻倍
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// 参考服务的调用契约：基准 1 秒，翻倍，最多补偿 3 次
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// 第 N 次补偿前的等待时间（attempt 从 0 开始）：base_delay << attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.min(MAX_BACKOFF_SHIFT))
    }

    /// 已失败 attempt 次后是否还有补偿额度
    pub fn has_budget(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// retry_transient — 带补偿的异步执行器
// ---------------------------------------------------------------------------

/// 在重试策略下执行异步操作
///
/// 瞬时错误在额度内退避后重做；永久性错误与耗尽额度后的最后一个
/// 错误原样返回，由调用方归类记账。
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, OrderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrderError>>,
{
    for attempt in 0.. {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "补偿执行成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            warn!(
                operation = operation_name,
                error = %err,
                "永久性错误，放弃执行"
            );
            return Err(err);
        }

        if !policy.has_budget(attempt) {
            warn!(
                operation = operation_name,
                attempt,
                max_retries = policy.max_retries,
                error = %err,
                "补偿额度用尽，带最后一个错误返回"
            );
            return Err(err);
        }

        let delay = policy.backoff_delay(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "瞬时错误，退避后补偿执行"
        );
        tokio::time::sleep(delay).await;
    }

    unreachable!("重试循环只能经由 return 退出")
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 测试用快速策略，避免测试等待过久
    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_default_policy_matches_client_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));

        // 契约的完整退避序列：1s、2s、4s
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_shift_is_clamped() {
        let policy = RetryPolicy::default();

        // 超出位移上限后等待时间不再增长
        assert_eq!(policy.backoff_delay(MAX_BACKOFF_SHIFT), policy.backoff_delay(63));
        assert_eq!(
            policy.backoff_delay(MAX_BACKOFF_SHIFT),
            Duration::from_secs(1 << MAX_BACKOFF_SHIFT)
        );
    }

    #[test]
    fn test_budget_boundaries() {
        let policy = fast_policy(3);

        assert!(policy.has_budget(0));
        assert!(policy.has_budget(2));
        assert!(!policy.has_budget(3));
        assert!(!policy.has_budget(4));
    }

    #[tokio::test]
    async fn test_first_success_skips_backoff() {
        let policy = fast_policy(3);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result = retry_transient(&policy, "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, OrderError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_recover_within_budget() {
        let policy = fast_policy(3);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result = retry_transient(&policy, "test_op", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(OrderError::RefTransient {
                        resource: "product",
                        message: "模拟瞬时故障".to_string(),
                    })
                } else {
                    Ok(99)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_last_error() {
        let policy = fast_policy(2);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result: Result<i32, _> = retry_transient(&policy, "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(OrderError::Timeout {
                    operation: "fetch_product".to_string(),
                })
            }
        })
        .await;

        assert_eq!(result.unwrap_err().code(), "TIMEOUT");
        // 首次执行 + 2 次补偿 = 3 次调用
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_returns_without_retry() {
        let policy = fast_policy(3);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result: Result<i32, _> = retry_transient(&policy, "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(OrderError::RefNotFound {
                    resource: "product",
                    id: "product-999".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
