//! 订单实体
//!
//! 持久化的完全反规范化订单记录：商品行是富化时刻的商品快照，
//! `customer_details` 是同一时刻的客户快照。订单一经写入不再被本
//! 工作进程修改。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::customer::CustomerDetails;

/// 订单状态
///
/// 状态机：pending -> processing -> {completed, failed}，终态不可逆。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OrderStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("未知的订单状态: {other}")),
        }
    }
}

/// 订单商品行
///
/// 富化时刻的商品快照，价格与激活状态都以该时刻为准。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub active: bool,
}

/// 持久化订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub customer_id: String,
    /// 与意图中 productIds 等长同序（含重复项）
    pub products: Vec<OrderLine>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub customer_details: CustomerDetails,
}

impl Order {
    /// 构造新订单
    ///
    /// 初始状态为 pending，总金额由商品行十进制精确求和。
    pub fn new(
        order_id: String,
        customer_id: String,
        products: Vec<OrderLine>,
        customer_details: CustomerDetails,
    ) -> Self {
        let now = Utc::now();
        let total_amount = Self::total_of(&products);

        Self {
            order_id,
            customer_id,
            products,
            total_amount,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            customer_details,
        }
    }

    /// 商品行价格的十进制精确求和
    pub fn total_of(products: &[OrderLine]) -> Decimal {
        products.iter().map(|line| line.price).sum()
    }

    /// 标记为处理中
    pub fn mark_processing(&mut self) {
        self.transition(OrderStatus::Processing);
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        self.transition(OrderStatus::Completed);
    }

    /// 标记为失败
    pub fn mark_failed(&mut self) {
        self.transition(OrderStatus::Failed);
    }

    /// 状态转换，终态不可逆
    fn transition(&mut self, next: OrderStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = next;
        self.updated_at = Utc::now();
    }
}
