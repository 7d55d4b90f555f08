//! Orders as the client sees them. The backend owns their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] AwaitingPayment, Paid, Packing, Shipped, Delivered, Canceled }

impl OrderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "Awaiting payment",
            Self::Paid => "Paid",
            Self::Packing => "Packing",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
            Self::Canceled => "Canceled",
        }
    }
}

/// Response of the checkout endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated { pub id: i64, pub status: OrderStatus, pub subtotal: String }

/// Public view of an order, readable without authentication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPublic { pub id: i64, pub subtotal: String, pub status: OrderStatus, pub email: String, pub full_name: String }

impl OrderPublic {
    pub fn amount(&self) -> Money { Money::parse_lenient(&self.subtotal) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: i64,
    pub status: OrderStatus,
    pub subtotal: String,
    #[serde(default)] pub total: Option<String>,
    #[serde(default)] pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine { pub product_id: i64, pub name: String, pub price: String, pub qty: u32 }

impl OrderLine {
    pub fn line_total(&self) -> Money { Money::parse_lenient(&self.price).multiply(self.qty).unwrap_or_default() }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub id: i64,
    pub status: OrderStatus,
    pub full_name: String,
    pub email: String,
    #[serde(default)] pub phone: String,
    pub subtotal: String,
    #[serde(default)] pub shipping_price: Option<String>,
    #[serde(default)] pub total: Option<String>,
    #[serde(default)] pub shipping_zip: String,
    #[serde(default)] pub shipping_street: String,
    #[serde(default)] pub shipping_number: String,
    #[serde(default)] pub shipping_complement: String,
    #[serde(default)] pub shipping_district: String,
    #[serde(default)] pub shipping_city: String,
    #[serde(default)] pub shipping_state: String,
    #[serde(default)] pub shipping_method: String,
    #[serde(default)] pub shipping_days: u32,
    #[serde(default)] pub items: Vec<OrderLine>,
    #[serde(default)] pub created_at: Option<DateTime<Utc>>,
}

impl OrderDetail {
    pub fn can_pay(&self) -> bool { self.status == OrderStatus::AwaitingPayment }
    pub fn item_count(&self) -> u32 { self.items.iter().map(|i| i.qty).sum() }

    /// Backend total when present, otherwise subtotal plus shipping.
    pub fn total(&self) -> Money {
        if let Some(total) = &self.total { return Money::parse_lenient(total); }
        let shipping = self.shipping_price.as_deref().map(Money::parse_lenient).unwrap_or_default();
        let subtotal = Money::parse_lenient(&self.subtotal);
        subtotal.add(&shipping).unwrap_or(subtotal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_order_detail_totals() {
        let order: OrderDetail = serde_json::from_str(
            r#"{"id":42,"status":"awaiting_payment","full_name":"Ana","email":"ana@example.com","subtotal":"100.00",
                "shipping_price":"29.90","items":[{"product_id":1,"name":"A","price":"50.00","qty":2}]}"#,
        ).unwrap();
        assert!(order.can_pay());
        assert_eq!(order.item_count(), 2);
        assert_eq!(order.total().amount(), Decimal::new(12990, 2));
        assert_eq!(order.items[0].line_total().amount(), Decimal::new(100, 0));
    }

    #[test]
    fn test_status_labels() {
        let status: OrderStatus = serde_json::from_str("\"shipped\"").unwrap();
        assert_eq!(status.label(), "Shipped");
    }
}
