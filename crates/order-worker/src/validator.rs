//! 订单业务校验
//!
//! 按固定顺序评估业务规则，遇到第一条不满足的规则即短路返回。
//! 校验拒绝不是错误：管道据此丢弃订单并将拒绝原因写入死信供运维查看。

use rust_decimal::Decimal;

use crate::models::{CustomerDetails, CustomerStatus, Order, OrderLine};

/// 校验拒绝原因
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationRejection {
    #[error("客户未激活: {customer_id} 当前状态={status}")]
    CustomerInactive {
        customer_id: String,
        status: CustomerStatus,
    },

    #[error("商品未激活: {product_id}")]
    ProductInactive { product_id: String },

    #[error("客户可用额度不足: 需要 {required}, 可用 {available}")]
    InsufficientCredit {
        required: Decimal,
        available: Decimal,
    },

    #[error("订单不含任何商品")]
    EmptyProducts,
}

/// 校验订单业务规则
///
/// 规则顺序固定：客户激活 -> 全部商品激活 -> 额度充足。
pub fn validate_order(
    customer: &CustomerDetails,
    lines: &[OrderLine],
) -> Result<(), ValidationRejection> {
    if !customer.is_active() {
        return Err(ValidationRejection::CustomerInactive {
            customer_id: customer.customer_id.clone(),
            status: customer.status,
        });
    }

    if let Some(inactive) = lines.iter().find(|line| !line.active) {
        return Err(ValidationRejection::ProductInactive {
            product_id: inactive.product_id.clone(),
        });
    }

    let required = Order::total_of(lines);
    if !customer.has_available_credit(required) {
        return Err(ValidationRejection::InsufficientCredit {
            required,
            available: customer.available_credit(),
        });
    }

    Ok(())
}
