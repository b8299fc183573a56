//! 熔断器 (Circuit Breaker) 模块
//!
//! 实现标准的三态熔断器模式，用于保护对参考服务（HTTP）的调用。
//! 基于最近 N 次调用的滑动窗口统计失败率：窗口填满且失败率达到阈值时
//! 断路器跳闸（Open），在恢复窗口后允许少量探测请求（Half-Open），
//! 探测成功则恢复（Closed），否则重新跳闸。
//!
//! 跳闸期间被拒绝的调用由客户端合成瞬时错误返回，交由上层重试策略处理。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常放行所有请求
    Closed,
    /// 断路器跳闸，拒绝所有请求
    Open,
    /// 允许少量探测请求，成功则恢复
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 滑动窗口大小：统计最近多少次调用（默认 10）
    pub window_size: usize,
    /// 失败率阈值：窗口填满且失败率达到该值时跳闸（默认 0.5）
    pub failure_rate_threshold: f64,
    /// 跳闸后多久进入半开状态（默认 60 秒）
    pub recovery_timeout: Duration,
    /// 半开状态允许通过的探测请求数（默认 3）
    pub half_open_permits: u32,
    /// 熔断器名称，用于日志和指标区分不同的服务调用
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            recovery_timeout: Duration::from_secs(60),
            half_open_permits: 3,
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    pub fn with_failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_permits(mut self, permits: u32) -> Self {
        self.half_open_permits = permits;
        self
    }
}

/// 熔断器内部状态，受 Mutex 保护
///
/// 窗口统计和状态转换涉及多个字段的一致性更新，需要互斥保护。
/// 每次调用仅在记录结果时短暂持锁，不会成为瓶颈。
struct InnerState {
    state: CircuitState,
    /// 最近调用结果的滑动窗口，true 表示失败
    window: VecDeque<bool>,
    /// Open→HalfOpen 计时起点
    opened_at: Option<Instant>,
    /// HalfOpen 中已放行的探测请求数
    half_open_attempts: u32,
    half_open_successes: u32,
}

impl InnerState {
    /// 窗口填满后的失败率，未填满时返回 None
    fn failure_rate(&self, window_size: usize) -> Option<f64> {
        if self.window.len() < window_size {
            return None;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        Some(failures as f64 / self.window.len() as f64)
    }

    /// 将调用结果推入窗口，保持窗口容量
    fn push_outcome(&mut self, failed: bool, window_size: usize) {
        if self.window.len() == window_size {
            self.window.pop_front();
        }
        self.window.push_back(failed);
    }
}

/// 熔断器
///
/// 线程安全，可在多个调用方之间通过 Clone 共享（内部为 Arc）。
/// 典型用法是通过 [`CircuitBreaker::call`] 包装异步调用，
/// 由熔断器自动记录成功与失败。
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<InnerState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            name = %config.name,
            window_size = config.window_size,
            failure_rate_threshold = config.failure_rate_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            half_open_permits = config.half_open_permits,
            "熔断器已创建"
        );

        Self {
            config,
            inner: Arc::new(Mutex::new(InnerState {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_attempts: 0,
                half_open_successes: 0,
            })),
        }
    }

    /// 获取当前状态（用于监控和日志）
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.recovery_timeout
        {
            return CircuitState::HalfOpen;
        }
        inner.state
    }

    /// 判断是否允许发起请求
    ///
    /// Closed：始终允许
    /// Open：检查恢复超时，到期则转为 HalfOpen 并放行
    /// HalfOpen：在探测配额内放行
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    self.transition_to(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_attempts = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_permits {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 记录调用成功
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                let window_size = self.config.window_size;
                inner.push_outcome(false, window_size);
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                // 半开探测全部成功，恢复为 Closed
                if inner.half_open_successes >= self.config.half_open_permits {
                    self.transition_to(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // Open 状态不放行请求，不应有成功调用，忽略
            }
        }
    }

    /// 记录调用失败
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                let window_size = self.config.window_size;
                inner.push_outcome(true, window_size);

                if let Some(rate) = inner.failure_rate(window_size)
                    && rate >= self.config.failure_rate_threshold
                {
                    inner.opened_at = Some(Instant::now());
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // 半开状态下探测失败，立即重新跳闸
                inner.opened_at = Some(Instant::now());
                self.transition_to(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                // 已经跳闸，刷新失败时间以延长恢复窗口
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    /// 执行受熔断器保护的异步调用
    ///
    /// 熔断器跳闸时返回 [`CircuitBreakerError::Open`]，
    /// 否则执行 f 并根据结果更新窗口统计。
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            record_circuit_breaker_rejection(&self.config.name);
            return Err(CircuitBreakerError::Open {
                name: self.config.name.clone(),
            });
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::ServiceError(e))
            }
        }
    }

    /// 状态转换（在锁内调用）
    fn transition_to(&self, inner: &mut InnerState, new_state: CircuitState) {
        let old_state = inner.state;
        inner.state = new_state;

        match new_state {
            CircuitState::HalfOpen => {
                inner.half_open_attempts = 0;
                inner.half_open_successes = 0;
            }
            CircuitState::Closed => {
                // 恢复后从空窗口重新统计
                inner.window.clear();
            }
            CircuitState::Open => {}
        }

        record_circuit_breaker_transition(&self.config.name, old_state, new_state);

        match new_state {
            CircuitState::Open => {
                warn!(
                    name = %self.config.name,
                    from = %old_state,
                    "熔断器跳闸：窗口失败率达到阈值，后续请求将被拒绝直到恢复窗口到期"
                );
            }
            CircuitState::HalfOpen => {
                info!(
                    name = %self.config.name,
                    permits = self.config.half_open_permits,
                    "熔断器进入半开状态：允许探测请求"
                );
            }
            CircuitState::Closed => {
                info!(
                    name = %self.config.name,
                    "熔断器恢复：服务已恢复正常"
                );
            }
        }
    }
}

/// 熔断器错误
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// 熔断器跳闸，请求被拒绝
    Open { name: String },
    /// 底层服务调用失败
    ServiceError(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { name } => write!(f, "熔断器 '{}' 处于跳闸状态，请求被拒绝", name),
            Self::ServiceError(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for CircuitBreakerError<E> {}

// ─── Prometheus 指标 ─────────────────────────────────────────────────

/// 记录状态转换
fn record_circuit_breaker_transition(name: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "circuit_breaker_transitions_total",
        "name" => name.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);

    let state_value = match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!(
        "circuit_breaker_state",
        "name" => name.to_string()
    )
    .set(state_value);
}

/// 记录请求被拒绝
fn record_circuit_breaker_rejection(name: &str) {
    metrics::counter!(
        "circuit_breaker_rejections_total",
        "name" => name.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 4,
            failure_rate_threshold: 0.5,
            recovery_timeout: Duration::from_millis(100),
            half_open_permits: 2,
            name: "test".to_string(),
        }
    }

    #[test]
    fn test_initial_state_is_closed() {
        let cb = CircuitBreaker::new(test_config());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_does_not_trip_before_window_is_full() {
        let cb = CircuitBreaker::new(test_config());

        // 窗口未填满时即使全部失败也不跳闸
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_trips_when_failure_rate_reaches_threshold() {
        let cb = CircuitBreaker::new(test_config());

        // 窗口 [成功, 成功, 失败, 失败] -> 失败率 50%，达到阈值
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let cb = CircuitBreaker::new(test_config());

        // 窗口 [成功, 成功, 成功, 失败] -> 失败率 25%，低于阈值
        cb.record_success();
        cb.record_success();
        cb.record_success();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_window_slides_over_old_outcomes() {
        let cb = CircuitBreaker::new(test_config());

        // 先填入两次失败，再用连续成功把失败挤出窗口
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_success();
        // 此时窗口 [失败, 失败, 成功, 成功] 已达阈值边缘……
        // 但 push 顺序意味着第 4 次记录时失败率恰为 50%，
        // 成功记录不触发跳闸评估，继续保持 Closed
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_success();
        cb.record_success();
        // 窗口 [成功, 成功, 成功, 成功]，失败已被挤出
        cb.record_failure();
        // 失败率 25%，不跳闸
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_recovery_to_half_open() {
        let cb = CircuitBreaker::new(test_config());

        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(150));

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_recovery() {
        let cb = CircuitBreaker::new(test_config());

        for _ in 0..4 {
            cb.record_failure();
        }

        std::thread::sleep(Duration::from_millis(150));

        // 半开状态下两次探测全部成功（half_open_permits = 2）
        assert!(cb.allow_request());
        cb.record_success();
        assert!(cb.allow_request());
        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_half_open_failure_trips_again() {
        let cb = CircuitBreaker::new(test_config());

        for _ in 0..4 {
            cb.record_failure();
        }

        std::thread::sleep(Duration::from_millis(150));

        assert!(cb.allow_request());
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_half_open_limits_probe_count() {
        let cb = CircuitBreaker::new(test_config());

        for _ in 0..4 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(150));

        // 配额 2 个探测请求，第 3 个被拒绝
        assert!(cb.allow_request());
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
    }

    #[tokio::test]
    async fn test_call_wrapper() {
        let cb = CircuitBreaker::new(test_config());

        let result: Result<i32, CircuitBreakerError<String>> = cb.call(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);

        // 失败调用填满窗口并触发跳闸
        for _ in 0..4 {
            let _: Result<i32, CircuitBreakerError<String>> = cb
                .call(|| async { Err("service down".to_string()) })
                .await;
        }

        let result: Result<i32, CircuitBreakerError<String>> = cb.call(|| async { Ok(42) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    }

    #[test]
    fn test_config_builder() {
        let config = CircuitBreakerConfig::new("product-service")
            .with_window_size(10)
            .with_failure_rate_threshold(0.5)
            .with_recovery_timeout(Duration::from_secs(60))
            .with_half_open_permits(5);

        assert_eq!(config.name, "product-service");
        assert_eq!(config.window_size, 10);
        assert!((config.failure_rate_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.half_open_permits, 5);
    }

    #[test]
    fn test_display_circuit_breaker_error() {
        let err: CircuitBreakerError<String> = CircuitBreakerError::Open {
            name: "test".to_string(),
        };
        assert!(err.to_string().contains("跳闸"));

        let err: CircuitBreakerError<String> =
            CircuitBreakerError::ServiceError("connection refused".to_string());
        assert_eq!(err.to_string(), "connection refused");
    }
}
