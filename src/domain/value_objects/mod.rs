//! Value Objects for the storefront

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CURRENCY: &str = "BRL";

/// Parses a backend decimal string. Anything non-numeric counts as zero.
pub fn parse_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw.trim()).unwrap_or(Decimal::ZERO)
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn brl(amount: Decimal) -> Self { Self::new(amount, DEFAULT_CURRENCY) }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn parse_lenient(raw: &str) -> Self { Self::brl(parse_decimal(raw)) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        let amount = self.amount.checked_add(other.amount).ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Result<Money, MoneyError> {
        let amount = self.amount.checked_mul(Decimal::from(qty)).ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, &self.currency))
    }
    /// Two-decimal string in the form the backend accepts.
    pub fn to_wire(&self) -> String { format!("{:.2}", self.amount) }
}

impl Default for Money { fn default() -> Self { Self::zero(DEFAULT_CURRENCY) } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.currency == DEFAULT_CURRENCY {
            write!(f, "R$ {:.2}", self.amount)
        } else {
            write!(f, "{:.2} {}", self.amount, self.currency)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { CurrencyMismatch, Overflow }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrencyMismatch => write!(f, "Currency mismatch"),
            Self::Overflow => write!(f, "Amount out of range"),
        }
    }
}

/// Quantity of one cart line, always within [`Quantity::MIN`, `Quantity::MAX`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 99;

    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(i64::from(Self::MIN), i64::from(Self::MAX)) as u32)
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: i64) -> Self { Self::clamped(i64::from(self.0).saturating_add(other)) }
}

impl Default for Quantity { fn default() -> Self { Self(Self::MIN) } }

/// Brazilian postal code (CEP), eight digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostalCode(String);

impl PostalCode {
    pub fn parse(raw: &str) -> Result<Self, PostalCodeError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.len() != 8 { return Err(PostalCodeError::Invalid); }
        Ok(Self(digits))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn formatted(&self) -> String { format!("{}-{}", &self.0[..5], &self.0[5..]) }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.formatted()) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PostalCodeError { Invalid }
impl std::error::Error for PostalCodeError {}
impl fmt::Display for PostalCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Invalid CEP: expected 8 digits") }
}
