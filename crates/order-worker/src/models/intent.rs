//! 入站订单意图消息
//!
//! 总线消息体的固定 schema，使用普通 JSON 解码。历史上曾因序列化器
//! 误开启多态类型标签（`@class` 字段）导致解析失败，现在的解码器对
//! 未知字段一律忽略，相应的回归输入在测试中固化。

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use order_shared::error::OrderError;

/// 订单意图
///
/// `order_id` 在系统生命周期内唯一标识一条意图；
/// `product_ids` 允许且保留重复项，富化结果与其顺序一一对应。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIntent {
    pub order_id: String,
    pub customer_id: String,
    pub product_ids: Vec<String>,
    /// 消息产生时间，格式 yyyy-MM-dd'T'HH:mm:ss，可缺省
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
}

impl OrderIntent {
    /// 从 JSON 文本解析并校验意图
    pub fn from_json(raw: &str) -> Result<Self, OrderError> {
        let intent: Self = serde_json::from_str(raw)
            .map_err(|e| OrderError::Parse(format!("订单意图反序列化失败: {e}")))?;
        intent.validate()?;
        Ok(intent)
    }

    /// 校验 schema 约束
    ///
    /// 空的 id 会被拼进下游 URL 和缓存键，必须在入口处拦截。
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.order_id.trim().is_empty() {
            return Err(OrderError::Parse("orderId 不能为空".to_string()));
        }
        if self.customer_id.trim().is_empty() {
            return Err(OrderError::Parse("customerId 不能为空".to_string()));
        }
        if self.product_ids.is_empty() {
            return Err(OrderError::Parse("productIds 不能为空".to_string()));
        }
        if self.product_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(OrderError::Parse("productIds 含有空的商品 id".to_string()));
        }
        Ok(())
    }
}
