//! Cart Aggregate

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use crate::domain::aggregates::product::Product;
use crate::domain::value_objects::{Money, Quantity, DEFAULT_CURRENCY};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cart {
    items: Vec<CartItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: i64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "price_from_any")]
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub qty: u32,
}

impl CartItem {
    pub fn from_product(product: &Product, qty: Quantity) -> Self {
        Self {
            product_id: product.id,
            slug: product.slug.clone(),
            name: product.name.clone(),
            price: product.price.clone(),
            image: product.first_image().map(str::to_string),
            qty: qty.value(),
        }
    }

    pub fn unit_price(&self) -> Money { Money::parse_lenient(&self.price) }
    /// Zero when the amount does not fit.
    pub fn line_total(&self) -> Money { self.unit_price().multiply(self.qty).unwrap_or_default() }
}

// Older payloads may carry the price as a JSON number.
fn price_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

impl Cart {
    /// Builds a cart from untrusted items, merging duplicate ids and clamping quantities.
    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::default();
        for mut item in items {
            let qty = i64::from(item.qty);
            match cart.items.iter_mut().find(|i| i.product_id == item.product_id) {
                Some(existing) => existing.qty = Quantity::clamped(i64::from(existing.qty)).add(qty).value(),
                None => {
                    item.qty = Quantity::clamped(qty).value();
                    cart.items.push(item);
                }
            }
        }
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn into_items(self) -> Vec<CartItem> { self.items }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn find(&self, product_id: i64) -> Option<&CartItem> { self.items.iter().find(|i| i.product_id == product_id) }

    /// Sum of all quantities.
    pub fn count(&self) -> u32 { self.items.iter().map(|i| i.qty).sum() }

    pub fn subtotal(&self) -> Money {
        self.items.iter().fold(Money::zero(DEFAULT_CURRENCY), |acc, i| acc.add(&i.line_total()).unwrap_or(acc))
    }

    pub fn total_amount(&self) -> Decimal { self.subtotal().amount() }

    /// Merges into an existing line or appends a new one. Returns the resulting quantity.
    pub fn add_item(&mut self, item: CartItem, qty: i64) -> u32 {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.qty = Quantity::clamped(i64::from(existing.qty)).add(qty).value();
            return existing.qty;
        }
        let qty = Quantity::clamped(qty).value();
        self.items.push(CartItem { qty, ..item });
        qty
    }

    pub fn remove_item(&mut self, product_id: i64) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        self.items.len() != before
    }

    /// Returns the clamped quantity, or `None` when the product is not in the cart.
    pub fn set_quantity(&mut self, product_id: i64, qty: i64) -> Option<u32> {
        let item = self.items.iter_mut().find(|i| i.product_id == product_id)?;
        item.qty = Quantity::clamped(qty).value();
        Some(item.qty)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
