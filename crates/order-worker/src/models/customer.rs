//! 客户快照
//!
//! 富化阶段从客户参考服务获取的快照，随订单一起持久化。
//! 金额字段使用十进制类型避免浮点累计误差。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 客户状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Suspended,
    Blocked,
}

impl std::fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
            Self::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

/// 客户快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    pub customer_id: String,
    pub name: String,
    pub email: String,
    pub status: CustomerStatus,
    #[serde(with = "rust_decimal::serde::float")]
    pub credit_limit: Decimal,
    /// 参考服务偶尔缺省该字段，按零余额处理
    #[serde(default, with = "rust_decimal::serde::float")]
    pub current_balance: Decimal,
}

impl CustomerDetails {
    /// 客户是否处于激活状态
    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }

    /// 当前可用额度
    pub fn available_credit(&self) -> Decimal {
        self.credit_limit - self.current_balance
    }

    /// 可用额度是否足以覆盖指定金额
    pub fn has_available_credit(&self, amount: Decimal) -> bool {
        self.available_credit() >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn active_customer(credit_limit: Decimal, current_balance: Decimal) -> CustomerDetails {
        CustomerDetails {
            customer_id: "customer-001".to_string(),
            name: "John Doe".to_string(),
            email: "john.doe@example.com".to_string(),
            status: CustomerStatus::Active,
            credit_limit,
            current_balance,
        }
    }

    #[test]
    fn test_is_active() {
        let mut customer = active_customer(dec!(5000), dec!(0));
        assert!(customer.is_active());

        for status in [
            CustomerStatus::Inactive,
            CustomerStatus::Suspended,
            CustomerStatus::Blocked,
        ] {
            customer.status = status;
            assert!(!customer.is_active());
        }
    }

    #[test]
    fn test_available_credit() {
        let customer = active_customer(dec!(3000), dec!(500));
        assert_eq!(customer.available_credit(), dec!(2500));

        assert!(customer.has_available_credit(dec!(2500)));
        assert!(!customer.has_available_credit(dec!(2500.01)));
    }

    #[test]
    fn test_status_wire_format_is_lowercase() {
        let json = serde_json::to_string(&CustomerStatus::Suspended).unwrap();
        assert_eq!(json, r#""suspended""#);

        let status: CustomerStatus = serde_json::from_str(r#""blocked""#).unwrap();
        assert_eq!(status, CustomerStatus::Blocked);
    }

    #[test]
    fn test_serde_camel_case_and_numeric_amounts() {
        let customer = active_customer(dec!(5000), dec!(0));
        let json = serde_json::to_string(&customer).unwrap();

        assert!(json.contains("customerId"));
        assert!(json.contains("creditLimit"));
        assert!(json.contains("currentBalance"));
        // 金额序列化为 JSON 数字而非字符串
        assert!(json.contains(r#""creditLimit":5000"#));

        let parsed: CustomerDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, customer);
    }

    #[test]
    fn test_missing_balance_defaults_to_zero() {
        let json = r#"{
            "customerId": "customer-001",
            "name": "John Doe",
            "email": "john.doe@example.com",
            "status": "active",
            "creditLimit": 5000.0
        }"#;

        let customer: CustomerDetails = serde_json::from_str(json).unwrap();
        assert_eq!(customer.current_balance, Decimal::ZERO);
        assert_eq!(customer.available_credit(), dec!(5000));
    }
}
