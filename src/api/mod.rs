//! HTTP client for the storefront backend.

pub mod cep;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::account::SessionStore;
use crate::config::Config;
use crate::domain::aggregates::order::{OrderCreated, OrderDetail, OrderPublic, OrderSummary};
use crate::domain::aggregates::product::Product;
use crate::{
    CardDetails, Payment, PaymentMethod, PaymentProvider, Result, ShippingQuote, StorefrontError, TokenPair, User,
    GENERIC_ERROR_MESSAGE,
};

// =============================================================================
// Request / response bodies
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteItem {
    pub product_id: i64,
    pub qty: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteRequest {
    pub zip: String,
    pub items: Vec<QuoteItem>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    quotes: Vec<ShippingQuote>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: i64,
    pub name: String,
    pub price: String,
    pub qty: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShippingRequest {
    pub zip: String,
    pub street: String,
    pub number: String,
    pub complement: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub method: String,
    pub label: String,
    pub price: String,
    pub days: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TotalsRequest {
    pub subtotal: String,
    pub shipping: String,
    pub total: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateOrderRequest {
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub items: Vec<OrderLineRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<TotalsRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatePaymentRequest {
    pub order_id: i64,
    pub method: PaymentMethod,
    pub provider: PaymentProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<CardDetails>,
    /// Sent as the `Idempotency-Key` header, not in the body.
    #[serde(skip)]
    pub idempotency_key: String,
}

impl CreatePaymentRequest {
    pub fn new(order_id: i64, provider: PaymentProvider, method: PaymentMethod) -> Self {
        Self { order_id, method, provider, card: None, idempotency_key: Uuid::new_v4().to_string() }
    }

    pub fn with_card(mut self, card: CardDetails) -> Self {
        self.card = Some(card);
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct PayOrderRequest {
    provider: PaymentProvider,
    method: PaymentMethod,
}

#[derive(Clone, Debug, Serialize)]
struct DummyWebhook {
    payment_id: i64,
    status: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ClaimResult {
    pub claimed: u32,
}

// =============================================================================
// Seams
// =============================================================================

/// Backend calls made by the checkout flow.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CheckoutApi: Send + Sync {
    async fn quote_shipping(&self, request: QuoteRequest) -> Result<Vec<ShippingQuote>>;
    async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderCreated>;
    async fn create_payment(&self, request: CreatePaymentRequest) -> Result<Payment>;
    async fn get_order(&self, order_id: i64) -> Result<OrderPublic>;
}

/// Backend calls made while tracking a payment.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentApi: Send + Sync {
    async fn get_payment(&self, payment_id: i64) -> Result<Payment>;
    async fn simulate_paid(&self, payment_id: i64) -> Result<()>;
}

// =============================================================================
// Client
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    session: Option<Arc<SessionStore>>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self { base_url: config.api_url.clone(), http, session: None })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: Client::new(), session: None }
    }

    /// Authenticated endpoints read the bearer token from this session.
    pub fn with_session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base_url.trim_end_matches('/'), path) }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.session.as_ref().and_then(|s| s.access_token()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // Catalog

    #[instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<Product>> {
        read_json(self.request(Method::GET, "/products/").send().await?).await
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, slug: &str) -> Result<Product> {
        read_json(self.request(Method::GET, &format!("/products/{slug}/")).send().await?).await
    }

    // Accounts

    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<User> {
        read_json(self.request(Method::POST, "/auth/register/").json(request).send().await?).await
    }

    #[instrument(skip(self, password))]
    pub async fn obtain_token(&self, username: &str, password: &str) -> Result<TokenPair> {
        let body = TokenRequest { username, password };
        read_json(self.request(Method::POST, "/auth/token/").json(&body).send().await?).await
    }

    pub async fn me(&self) -> Result<User> {
        read_json(self.request(Method::GET, "/me/").send().await?).await
    }

    // Orders

    pub async fn my_orders(&self) -> Result<Vec<OrderSummary>> {
        read_json(self.request(Method::GET, "/my/orders/").send().await?).await
    }

    #[instrument(skip(self))]
    pub async fn my_order(&self, order_id: i64) -> Result<OrderDetail> {
        read_json(self.request(Method::GET, &format!("/my/orders/{order_id}/")).send().await?).await
    }

    pub async fn claim_guest_orders(&self) -> Result<ClaimResult> {
        read_json(self.request(Method::POST, "/my/orders/claim/").send().await?).await
    }

    /// Starts a payment for an order that already belongs to the signed-in user.
    #[instrument(skip(self))]
    pub async fn pay_order(&self, order_id: i64, provider: PaymentProvider, method: PaymentMethod) -> Result<Payment> {
        let body = PayOrderRequest { provider, method };
        read_json(self.request(Method::POST, &format!("/my/orders/{order_id}/pay/")).json(&body).send().await?).await
    }
}

#[async_trait]
impl CheckoutApi for ApiClient {
    #[instrument(skip(self, request), fields(zip = %request.zip, items = request.items.len()))]
    async fn quote_shipping(&self, request: QuoteRequest) -> Result<Vec<ShippingQuote>> {
        let response: QuoteResponse = read_json(self.request(Method::POST, "/shipping/quote/").json(&request).send().await?).await?;
        debug!(quotes = response.quotes.len(), "shipping quoted");
        Ok(response.quotes)
    }

    #[instrument(skip(self, request), fields(items = request.items.len()))]
    async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderCreated> {
        read_json(self.request(Method::POST, "/checkout/").json(&request).send().await?).await
    }

    #[instrument(skip(self, request), fields(order_id = request.order_id, provider = %request.provider, method = %request.method))]
    async fn create_payment(&self, request: CreatePaymentRequest) -> Result<Payment> {
        let response = self
            .request(Method::POST, "/payments/create/")
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_order(&self, order_id: i64) -> Result<OrderPublic> {
        read_json(self.request(Method::GET, &format!("/orders/{order_id}/")).send().await?).await
    }
}

#[async_trait]
impl PaymentApi for ApiClient {
    async fn get_payment(&self, payment_id: i64) -> Result<Payment> {
        read_json(self.request(Method::GET, &format!("/payments/{payment_id}/")).send().await?).await
    }

    #[instrument(skip(self))]
    async fn simulate_paid(&self, payment_id: i64) -> Result<()> {
        let body = DummyWebhook { payment_id, status: "paid" };
        let response = self.request(Method::POST, "/payments/webhook/dummy/").json(&body).send().await?;
        ensure_success(response).await.map(|_| ())
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = extract_detail(&body);
    warn!(status, %message, "backend request failed");
    Err(StorefrontError::Api { status, message })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = ensure_success(response).await?;
    Ok(response.json().await?)
}

/// Best-effort human message from an error body: the `detail` field, else the
/// JSON body itself, else the raw text.
pub fn extract_detail(body: &str) -> String {
    let body = body.trim();
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            if let Some(Value::String(detail)) = map.get("detail") {
                return detail.clone();
            }
            if map.is_empty() { GENERIC_ERROR_MESSAGE.to_string() } else { Value::Object(map).to_string() }
        }
        Ok(Value::Null) => GENERIC_ERROR_MESSAGE.to_string(),
        Ok(Value::String(s)) if !s.trim().is_empty() => s,
        Ok(Value::Array(a)) if !a.is_empty() => Value::Array(a).to_string(),
        _ if !body.is_empty() && !body.starts_with('<') => body.to_string(),
        _ => GENERIC_ERROR_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_detail() {
        assert_eq!(extract_detail(r#"{"detail":"Carrinho vazio."}"#), "Carrinho vazio.");
        assert_eq!(extract_detail(r#"{"email":["Enter a valid email address."]}"#), r#"{"email":["Enter a valid email address."]}"#);
        assert_eq!(extract_detail("{}"), GENERIC_ERROR_MESSAGE);
        assert_eq!(extract_detail(""), GENERIC_ERROR_MESSAGE);
        assert_eq!(extract_detail("Bad Gateway"), "Bad Gateway");
        assert_eq!(extract_detail("<html>oops</html>"), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_order_request_shape() {
        let request = CreateOrderRequest {
            full_name: "Ana".into(),
            email: "ana@example.com".into(),
            phone: None,
            items: vec![OrderLineRequest { product_id: 1, name: "A".into(), price: "10.00".into(), qty: 2 }],
            shipping: None,
            totals: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["items"][0]["productId"], 1);
        assert!(json.get("phone").is_none());
        assert!(json.get("shipping").is_none());
    }

    #[test]
    fn test_payment_request_keeps_key_out_of_body() {
        let request = CreatePaymentRequest::new(42, PaymentProvider::Dummy, PaymentMethod::Pix);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"order_id": 42, "method": "pix", "provider": "dummy"}));
        assert_eq!(request.idempotency_key.len(), 36);
    }
}
