//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod checkout;

pub use product::{Brand, Category, Product, ProductImage};
pub use order::{OrderCreated, OrderDetail, OrderLine, OrderPublic, OrderStatus, OrderSummary};
pub use cart::{Cart, CartItem};
pub use checkout::{CheckoutDraft, CheckoutError, CheckoutTotals, CustomerInfo, PaymentChoice, ShippingAddress};
