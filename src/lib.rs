//! OpenSASE Storefront
//!
//! Client side of the OpenSASE shop: everything a buyer touches before the
//! backend takes over.
//!
//! ## Features
//! - Catalog browsing
//! - Durable shopping cart with change notifications
//! - Checkout with shipping quotes
//! - Pix and card payment tracking
//! - Customer accounts and order history

pub mod account;
pub mod api;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod poller;
pub mod storage;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use domain::aggregates::checkout::CheckoutError;
pub use domain::value_objects::PostalCodeError;

// =============================================================================
// Core Types
// =============================================================================

/// A priced shipping option for a destination and the current cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub id: String,
    pub label: String,
    pub price: String,
    pub days: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    #[default]
    Dummy,
    MercadoPago,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dummy => "dummy",
            Self::MercadoPago => "mercado_pago",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dummy" => Ok(Self::Dummy),
            "mercado_pago" | "mercadopago" => Ok(Self::MercadoPago),
            other => Err(format!("unknown payment provider `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Pix,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pix" => Ok(Self::Pix),
            "card" => Ok(Self::Card),
            other => Err(format!("unknown payment method `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Created,
    Pending,
    Paid,
    Failed,
    Canceled,
    Refunded,
}

impl PaymentStatus {
    /// No further transitions are expected once a payment reaches one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Failed | Self::Canceled | Self::Refunded)
    }

    pub fn is_unsuccessful(&self) -> bool { matches!(self, Self::Failed | Self::Canceled) }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Payment as reported by the backend. The client only reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub order: i64,
    pub provider: PaymentProvider,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: String,
    #[serde(default)]
    pub pix_qr_code: String,
    #[serde(default)]
    pub pix_qr_code_base64: String,
    #[serde(default)]
    pub pix_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// The dummy gateway exposes a manual "mark as paid" webhook for testing.
    pub fn can_simulate(&self) -> bool {
        self.provider == PaymentProvider::Dummy
    }

    pub fn pix_code(&self) -> Option<&str> {
        let code = self.pix_qr_code.trim();
        (!code.is_empty()).then_some(code)
    }
}

/// Card data produced by the gateway's tokenization widget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub token: String,
    pub payment_method_id: String,
    pub installments: u32,
    #[serde(default)]
    pub issuer_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

// =============================================================================
// Error Types
// =============================================================================

pub const GENERIC_ERROR_MESSAGE: &str = "Unknown error";

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    PostalCode(#[from] PostalCodeError),

    #[error("Address lookup failed")]
    AddressLookupFailed,

    #[error("No address found for this CEP")]
    AddressNotFound,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Payment simulation is only available for the dummy provider")]
    NotDummyProvider,

    #[error("Payment has not been loaded yet")]
    PaymentNotLoaded,
}

impl StorefrontError {
    /// HTTP status reported by the backend, if the error came from it.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Text suitable for an inline message next to the control that failed.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http(_) => "Could not reach the store. Check your connection and try again.".to_string(),
            Self::Storage(_) | Self::Serialization(_) => "Could not save your data on this device.".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;
