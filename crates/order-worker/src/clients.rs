//! 参考服务 HTTP 客户端
//!
//! 商品与客户两个参考服务的只读客户端，统一响应码到错误分类的映射：
//! 200 解析响应体；404 为永久性的"未找到"；其余 4xx 为永久性错误；
//! 5xx、超时与连接错误为瞬时错误，由调用方的重试策略处理。
//!
//! 每个客户端各自持有一个命名熔断器。跳闸期间不发起真实请求，
//! 直接合成瞬时错误交给上层退避。4xx 应答说明依赖本身是健康的，
//! 不计入熔断窗口。
//!
//! 通过 trait 抽象客户端接口，便于测试时注入 mock 实现。

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use order_shared::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use order_shared::config::ReferenceConfig;
use order_shared::error::OrderError;

use crate::models::{CustomerDetails, CustomerStatus, OrderLine};

// ---------------------------------------------------------------------------
// Trait 抽象
// ---------------------------------------------------------------------------

/// 商品参考服务接口
#[async_trait]
pub trait ProductDirectory: Send + Sync {
    /// 按 id 获取商品快照
    async fn fetch(&self, product_id: &str) -> Result<OrderLine, OrderError>;
}

/// 客户参考服务接口
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// 按 id 获取客户快照
    async fn fetch(&self, customer_id: &str) -> Result<CustomerDetails, OrderError>;
}

// ---------------------------------------------------------------------------
// 响应 DTO
// ---------------------------------------------------------------------------

/// 商品服务响应体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductResponse {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    active: bool,
}

impl From<ProductResponse> for OrderLine {
    fn from(response: ProductResponse) -> Self {
        Self {
            product_id: response.id,
            name: response.name,
            description: response.description,
            price: response.price,
            active: response.active,
        }
    }
}

/// 客户服务响应体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerResponse {
    id: String,
    name: String,
    email: String,
    status: CustomerStatus,
    #[serde(with = "rust_decimal::serde::float")]
    credit_limit: Decimal,
    #[serde(default, with = "rust_decimal::serde::float")]
    current_balance: Decimal,
}

impl From<CustomerResponse> for CustomerDetails {
    fn from(response: CustomerResponse) -> Self {
        Self {
            customer_id: response.id,
            name: response.name,
            email: response.email,
            status: response.status,
            credit_limit: response.credit_limit,
            current_balance: response.current_balance,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP 调用与错误分类
// ---------------------------------------------------------------------------

/// 发起 GET 请求并将响应映射为领域结果
async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    resource: &'static str,
    url: &str,
    id: &str,
) -> Result<T, OrderError> {
    debug!(resource, id, url, "请求参考服务");

    // 超时、连接拒绝、传输中断都按瞬时错误处理
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| OrderError::RefTransient {
            resource,
            message: e.to_string(),
        })?;

    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(OrderError::RefNotFound {
            resource,
            id: id.to_string(),
        });
    }

    if status.is_client_error() {
        return Err(OrderError::RefPermanent {
            resource,
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("client error")
                .to_string(),
        });
    }

    if !status.is_success() {
        return Err(OrderError::RefTransient {
            resource,
            message: format!("上游返回 {status}"),
        });
    }

    // 响应体被截断或临时异常时重试仍有机会成功
    response
        .json::<T>()
        .await
        .map_err(|e| OrderError::RefTransient {
            resource,
            message: format!("响应体解析失败: {e}"),
        })
}

/// 在熔断器保护下执行一次调用
///
/// 仅瞬时错误计入熔断窗口；404 与其他 4xx 是依赖健康的明确应答，
/// 按成功记录，避免数据问题误触跳闸。
async fn call_guarded<T, Fut>(
    breaker: &CircuitBreaker,
    resource: &'static str,
    fut: Fut,
) -> Result<T, OrderError>
where
    Fut: std::future::Future<Output = Result<T, OrderError>>,
{
    if !breaker.allow_request() {
        return Err(OrderError::RefTransient {
            resource,
            message: "熔断器跳闸，请求被短路".to_string(),
        });
    }

    match fut.await {
        Ok(value) => {
            breaker.record_success();
            Ok(value)
        }
        Err(e) if e.is_transient() => {
            breaker.record_failure();
            Err(e)
        }
        Err(e) => {
            breaker.record_success();
            Err(e)
        }
    }
}

/// 空 id 会被拼成列表端点的 URL，必须在发起请求前拦截
fn require_id(resource: &'static str, id: &str) -> Result<(), OrderError> {
    if id.trim().is_empty() {
        return Err(OrderError::Parse(format!("{resource} id 不能为空")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 客户端实现
// ---------------------------------------------------------------------------

/// 商品参考服务 HTTP 客户端
pub struct ProductApiClient {
    http: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl ProductApiClient {
    pub fn new(config: &ReferenceConfig) -> Result<Self, OrderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| OrderError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        info!(base_url = %config.product_api_url, "商品服务客户端已初始化");

        Ok(Self {
            http,
            base_url: config.product_api_url.trim_end_matches('/').to_string(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::new("product-service")),
        })
    }
}

#[async_trait]
impl ProductDirectory for ProductApiClient {
    async fn fetch(&self, product_id: &str) -> Result<OrderLine, OrderError> {
        require_id("product", product_id)?;

        let url = format!("{}/api/products/{}", self.base_url, product_id);
        let result = call_guarded(
            &self.breaker,
            "product",
            get_json::<ProductResponse>(&self.http, "product", &url, product_id),
        )
        .await;

        match result {
            Ok(response) => Ok(OrderLine::from(response)),
            Err(e) => {
                warn!(product_id, error = %e, "获取商品快照失败");
                Err(e)
            }
        }
    }
}

/// 客户参考服务 HTTP 客户端
pub struct CustomerApiClient {
    http: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl CustomerApiClient {
    pub fn new(config: &ReferenceConfig) -> Result<Self, OrderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| OrderError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        info!(base_url = %config.customer_api_url, "客户服务客户端已初始化");

        Ok(Self {
            http,
            base_url: config.customer_api_url.trim_end_matches('/').to_string(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::new("customer-service")),
        })
    }
}

#[async_trait]
impl CustomerDirectory for CustomerApiClient {
    async fn fetch(&self, customer_id: &str) -> Result<CustomerDetails, OrderError> {
        require_id("customer", customer_id)?;

        let url = format!("{}/api/customers/{}", self.base_url, customer_id);
        let result = call_guarded(
            &self.breaker,
            "customer",
            get_json::<CustomerResponse>(&self.http, "customer", &url, customer_id),
        )
        .await;

        match result {
            Ok(response) => Ok(CustomerDetails::from(response)),
            Err(e) => {
                warn!(customer_id, error = %e, "获取客户快照失败");
                Err(e)
            }
        }
    }
}
