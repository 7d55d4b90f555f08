//! Checkout draft: what the buyer has typed so far, plus the shipping quotes
//! offered for it. Never persisted.

use thiserror::Error;
use validator::{Validate, ValidationError};
use crate::domain::aggregates::cart::Cart;
use crate::domain::value_objects::Money;
use crate::{PaymentMethod, PaymentProvider, ShippingQuote};

#[derive(Clone, Debug, Default, PartialEq, Eq, Validate)]
pub struct CustomerInfo {
    #[validate(custom = "not_blank")]
    pub full_name: String,
    #[validate(custom = "not_blank")]
    pub email: String,
    pub phone: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Validate)]
pub struct ShippingAddress {
    #[validate(custom = "not_blank")]
    pub zip: String,
    #[validate(custom = "not_blank")]
    pub street: String,
    #[validate(custom = "not_blank")]
    pub number: String,
    pub complement: String,
    #[validate(custom = "not_blank")]
    pub district: String,
    #[validate(custom = "not_blank")]
    pub city: String,
    #[validate(custom = "not_blank")]
    pub state: String,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() { return Err(ValidationError::new("blank")); }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PaymentChoice { pub provider: PaymentProvider, pub method: PaymentMethod }

impl PaymentChoice {
    /// Card payments through Mercado Pago need the card tokenized first, so the
    /// payment is created later by the card step.
    pub fn defers_payment(&self) -> bool {
        self.provider == PaymentProvider::MercadoPago && self.method == PaymentMethod::Card
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutTotals { pub subtotal: Money, pub shipping: Money, pub total: Money }

#[derive(Clone, Debug, Default)]
pub struct CheckoutDraft {
    pub customer: CustomerInfo,
    pub address: ShippingAddress,
    pub payment: PaymentChoice,
    quotes: Vec<ShippingQuote>,
    quoted_zip: Option<String>,
    selected_quote: Option<String>,
}

impl CheckoutDraft {
    pub fn quotes(&self) -> &[ShippingQuote] { &self.quotes }

    /// The selected quote, as long as it was quoted for the current ZIP.
    pub fn selected_quote(&self) -> Option<&ShippingQuote> {
        if self.quoted_zip.as_deref() != Some(normalize_zip(&self.address.zip).as_str()) { return None; }
        let id = self.selected_quote.as_deref()?;
        self.quotes.iter().find(|q| q.id == id)
    }

    /// Replaces the whole quote set and selects the first option, if any.
    pub fn replace_quotes(&mut self, quotes: Vec<ShippingQuote>) {
        self.selected_quote = quotes.first().map(|q| q.id.clone());
        self.quoted_zip = Some(normalize_zip(&self.address.zip));
        self.quotes = quotes;
    }

    pub fn select_quote(&mut self, id: &str) -> Result<(), CheckoutError> {
        if !self.quotes.iter().any(|q| q.id == id) { return Err(CheckoutError::UnknownQuote(id.to_string())); }
        self.selected_quote = Some(id.to_string());
        Ok(())
    }

    pub fn clear_quotes(&mut self) {
        self.quotes.clear();
        self.quoted_zip = None;
        self.selected_quote = None;
    }

    /// Changing the destination discards quotes computed for the old one.
    pub fn set_zip(&mut self, zip: &str) {
        if normalize_zip(zip) != normalize_zip(&self.address.zip) { self.clear_quotes(); }
        self.address.zip = zip.trim().to_string();
    }

    /// Submission preconditions, checked in order. The first failure wins.
    pub fn validate_for_submit(&self, cart: &Cart) -> Result<&ShippingQuote, CheckoutError> {
        if cart.is_empty() { return Err(CheckoutError::EmptyCart); }
        if self.customer.validate().is_err() { return Err(CheckoutError::MissingCustomer); }
        if self.address.validate().is_err() { return Err(CheckoutError::IncompleteAddress); }
        self.selected_quote().ok_or(CheckoutError::NoShippingQuote)
    }

    /// Shipping counts as zero until a quote is selected.
    pub fn totals(&self, cart: &Cart) -> CheckoutTotals {
        let subtotal = cart.subtotal();
        let shipping = self.selected_quote().map(|q| Money::parse_lenient(&q.price)).unwrap_or_default();
        let total = subtotal.add(&shipping).unwrap_or_else(|_| subtotal.clone());
        CheckoutTotals { subtotal, shipping, total }
    }
}

fn normalize_zip(zip: &str) -> String { zip.chars().filter(char::is_ascii_alphanumeric).collect() }

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("Your cart is empty")]
    EmptyCart,
    #[error("Fill in your name and e-mail")]
    MissingCustomer,
    #[error("Fill in the complete delivery address")]
    IncompleteAddress,
    #[error("Choose a shipping option")]
    NoShippingQuote,
    #[error("Enter a ZIP code to quote shipping")]
    MissingZip,
    #[error("Shipping option `{0}` is not available")]
    UnknownQuote(String),
    #[error("This checkout was already submitted")]
    AlreadySubmitted,
    #[error("Order amount is not valid for card payment")]
    InvalidOrderAmount,
}
