//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于管道层依赖抽象而非具体实现，支持 mock 测试。

use async_trait::async_trait;

use order_shared::error::Result;

use crate::models::Order;

/// 写入结果
///
/// 唯一索引冲突是正常的业务信号（重复投递），不作为错误返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// 新订单已写入
    Saved,
    /// `order_id` 已存在，本次写入被唯一索引拒绝
    Conflict,
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// 写入订单，唯一索引冲突以 [`SaveOutcome::Conflict`] 返回
    async fn save(&self, order: &Order) -> Result<SaveOutcome>;

    /// 按 orderId 查询订单
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>>;

    /// 按 orderId 检查订单是否存在
    async fn exists_by_order_id(&self, order_id: &str) -> Result<bool>;
}
