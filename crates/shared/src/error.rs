//! 统一错误处理模块
//!
//! 定义订单处理系统共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 错误分为瞬时（Transient）与永久（Permanent）两类，失败台账根据分类
//! 决定是推进重试计数还是直接写入死信。

use thiserror::Error;

/// 失败分类
///
/// 瞬时失败（网络抖动、上游超时、连接池满）值得重试；
/// 永久失败（404、参数非法、消息格式错误）重试不会改变结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// 系统错误类型
#[derive(Debug, Error)]
pub enum OrderError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== Redis 错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 消息解析错误 ====================
    #[error("消息解析失败: {0}")]
    Parse(String),

    // ==================== 参考服务错误 ====================
    #[error("参考数据未找到: {resource} id={id}")]
    RefNotFound { resource: &'static str, id: String },

    #[error("参考服务永久性错误: {resource} status={status} - {message}")]
    RefPermanent {
        resource: &'static str,
        status: u16,
        message: String,
    },

    #[error("参考服务瞬时错误: {resource} - {message}")]
    RefTransient {
        resource: &'static str,
        message: String,
    },

    // ==================== 通用错误 ====================
    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::RefNotFound { .. } => "REF_NOT_FOUND",
            Self::RefPermanent { .. } => "REF_PERMANENT",
            Self::RefTransient { .. } => "REF_TRANSIENT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为瞬时错误
    ///
    /// 基础设施连通性问题和上游瞬时故障重试后可能恢复；
    /// 解析失败与参考服务的 404/4xx 不会因重试而改变。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Redis(_)
                | Self::Kafka(_)
                | Self::RefTransient { .. }
                | Self::Timeout { .. }
                | Self::Internal(_)
        )
    }

    /// 映射到失败台账使用的分类
    pub fn failure_class(&self) -> FailureClass {
        if self.is_transient() {
            FailureClass::Transient
        } else {
            FailureClass::Permanent
        }
    }
}
