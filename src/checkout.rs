//! Checkout flow controller.
//!
//! Drives a cart snapshot through shipping quotes, order creation and payment
//! creation, and tells the caller where to go next. Phases:
//!
//! ```text
//! Editing -> QuotingShipping -> ReadyToSubmit -> Submitting -> Done
//!                                      ^              |
//!                                      \-- on error --/
//! ```
//!
//! Ordering: the order is confirmed before a payment is requested, and the
//! cart is cleared only once the payment exists (or, for gateway card
//! payments, once the order exists and the card step takes over). A retry
//! after a payment failure reuses the order as long as the draft is unchanged.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::api::cep::AddressLookup;
use crate::api::{
    ApiClient, CheckoutApi, CreateOrderRequest, CreatePaymentRequest, OrderLineRequest, QuoteItem, QuoteRequest, ShippingRequest,
    TotalsRequest,
};
use crate::domain::aggregates::cart::Cart;
use crate::domain::aggregates::checkout::{CheckoutDraft, CheckoutError, CheckoutTotals, CustomerInfo, PaymentChoice, ShippingAddress};
use crate::domain::value_objects::PostalCode;
use crate::store::CartStore;
use crate::{CardDetails, PaymentMethod, PaymentProvider, Result, ShippingQuote, StorefrontError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckoutPhase {
    #[default]
    Editing,
    QuotingShipping,
    ReadyToSubmit,
    Submitting,
    Done,
}

/// Where the buyer should be taken after a successful submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckoutRedirect {
    /// Track the status of an existing payment.
    PaymentStatus { order_id: i64, payment_id: i64 },
    /// Tokenize a card for this order; the payment is created there.
    CardPayment { order_id: i64 },
}

pub struct CheckoutController<A: ?Sized> {
    api: Arc<A>,
    cart_store: Arc<CartStore>,
    cart: Cart,
    draft: CheckoutDraft,
    phase: CheckoutPhase,
    error: Option<String>,
    redirect: Option<CheckoutRedirect>,
    placed: Option<PlacedOrder>,
}

/// An order created by an earlier attempt whose payment did not go through.
#[derive(Debug)]
struct PlacedOrder {
    order_id: i64,
    request: CreateOrderRequest,
}

impl<A: CheckoutApi + ?Sized> CheckoutController<A> {
    /// Takes a snapshot of the cart. Later changes to the store are not picked up.
    pub fn new(api: Arc<A>, cart_store: Arc<CartStore>) -> Self {
        let cart = cart_store.snapshot();
        Self {
            api,
            cart_store,
            cart,
            draft: CheckoutDraft::default(),
            phase: CheckoutPhase::Editing,
            error: None,
            redirect: None,
            placed: None,
        }
    }

    pub fn phase(&self) -> CheckoutPhase { self.phase }
    pub fn error(&self) -> Option<&str> { self.error.as_deref() }
    pub fn cart(&self) -> &Cart { &self.cart }
    pub fn draft(&self) -> &CheckoutDraft { &self.draft }
    pub fn redirect(&self) -> Option<CheckoutRedirect> { self.redirect }
    pub fn quotes(&self) -> &[ShippingQuote] { self.draft.quotes() }
    pub fn selected_quote(&self) -> Option<&ShippingQuote> { self.draft.selected_quote() }
    pub fn totals(&self) -> CheckoutTotals { self.draft.totals(&self.cart) }

    pub fn customer_mut(&mut self) -> &mut CustomerInfo { &mut self.draft.customer }

    /// Replaces the whole delivery address. A changed ZIP discards the quotes,
    /// as with [`Self::set_zip`].
    pub fn set_address(&mut self, address: ShippingAddress) {
        let zip = address.zip.clone();
        self.draft.address = ShippingAddress { zip: self.draft.address.zip.clone(), ..address };
        self.set_zip(&zip);
    }

    pub fn set_zip(&mut self, zip: &str) {
        self.draft.set_zip(zip);
        if self.draft.selected_quote().is_none() && self.phase == CheckoutPhase::ReadyToSubmit {
            self.phase = CheckoutPhase::Editing;
        }
    }

    pub fn set_payment(&mut self, provider: PaymentProvider, method: PaymentMethod) {
        self.draft.payment = PaymentChoice { provider, method };
    }

    pub fn select_quote(&mut self, id: &str) -> Result<()> {
        self.draft.select_quote(id).map_err(|e| self.fail_validation(e))
    }

    #[instrument(skip(self), fields(zip = %self.draft.address.zip))]
    pub async fn request_quotes(&mut self) -> Result<&[ShippingQuote]> {
        self.ensure_open()?;
        self.error = None;
        if self.draft.address.zip.trim().is_empty() {
            self.phase = CheckoutPhase::Editing;
            return Err(self.fail_validation(CheckoutError::MissingZip));
        }
        if self.cart.is_empty() {
            self.phase = CheckoutPhase::Editing;
            return Err(self.fail_validation(CheckoutError::EmptyCart));
        }

        self.phase = CheckoutPhase::QuotingShipping;
        let request = QuoteRequest {
            zip: self.draft.address.zip.trim().to_string(),
            items: self.cart.items().iter().map(|i| QuoteItem { product_id: i.product_id, qty: i.qty }).collect(),
        };
        match self.api.quote_shipping(request).await {
            Ok(quotes) => {
                info!(count = quotes.len(), "shipping quotes received");
                self.draft.replace_quotes(quotes);
                self.phase = if self.draft.selected_quote().is_some() { CheckoutPhase::ReadyToSubmit } else { CheckoutPhase::Editing };
                Ok(self.draft.quotes())
            }
            Err(e) => {
                warn!(error = %e, "shipping quote failed");
                self.draft.clear_quotes();
                self.phase = CheckoutPhase::Editing;
                self.error = Some(format!("Could not quote shipping: {}", e.user_message()));
                Err(e)
            }
        }
    }

    /// Prefills street, district, city and state from the ZIP. Returns a soft
    /// warning instead of failing when the lookup does not work out.
    pub async fn autofill_address<L: AddressLookup + ?Sized>(&mut self, lookup: &L) -> Option<String> {
        let cep = match PostalCode::parse(&self.draft.address.zip) {
            Ok(cep) => cep,
            Err(e) => return Some(e.to_string()),
        };
        match lookup.lookup(cep).await {
            Ok(found) => {
                let address = &mut self.draft.address;
                address.street = found.logradouro;
                address.district = found.bairro;
                address.city = found.localidade;
                address.state = found.uf;
                None
            }
            Err(e) => {
                warn!(error = %e, "address autofill failed");
                Some(e.user_message())
            }
        }
    }

    /// Validates the draft, creates the order and, unless the card step owns
    /// it, the payment. The cart is cleared only after those succeed.
    #[instrument(skip(self), fields(provider = %self.draft.payment.provider, method = %self.draft.payment.method))]
    pub async fn submit(&mut self) -> Result<CheckoutRedirect> {
        self.ensure_open()?;
        self.error = None;
        let quote = match self.draft.validate_for_submit(&self.cart) {
            Ok(quote) => quote.clone(),
            Err(e) => return Err(self.fail_validation(e)),
        };

        self.phase = CheckoutPhase::Submitting;
        match self.place_order(&quote).await {
            Ok(redirect) => {
                self.phase = CheckoutPhase::Done;
                self.redirect = Some(redirect);
                Ok(redirect)
            }
            Err(e) => {
                warn!(error = %e, "checkout failed");
                self.phase = if self.draft.selected_quote().is_some() { CheckoutPhase::ReadyToSubmit } else { CheckoutPhase::Editing };
                self.error = Some(format!("Could not complete checkout: {}", e.user_message()));
                Err(e)
            }
        }
    }

    async fn place_order(&mut self, quote: &ShippingQuote) -> Result<CheckoutRedirect> {
        let request = self.order_request(quote);
        let reusable = self.placed.as_ref().filter(|placed| placed.request == request).map(|placed| placed.order_id);
        let order_id = match reusable {
            Some(order_id) => {
                info!(order_id, "retrying payment for existing order");
                order_id
            }
            None => {
                let order = self.api.create_order(request.clone()).await?;
                info!(order_id = order.id, "order created");
                self.placed = Some(PlacedOrder { order_id: order.id, request });
                order.id
            }
        };

        let choice = self.draft.payment;
        if choice.defers_payment() {
            self.clear_cart();
            return Ok(CheckoutRedirect::CardPayment { order_id });
        }

        let payment = self.api.create_payment(CreatePaymentRequest::new(order_id, choice.provider, choice.method)).await?;
        info!(order_id, payment_id = payment.id, "payment created");
        self.clear_cart();
        Ok(CheckoutRedirect::PaymentStatus { order_id, payment_id: payment.id })
    }

    fn order_request(&self, quote: &ShippingQuote) -> CreateOrderRequest {
        let customer = &self.draft.customer;
        let address = &self.draft.address;
        let totals = self.totals();
        let phone = customer.phone.trim();
        CreateOrderRequest {
            full_name: customer.full_name.trim().to_string(),
            email: customer.email.trim().to_string(),
            phone: (!phone.is_empty()).then(|| phone.to_string()),
            items: self
                .cart
                .items()
                .iter()
                .map(|i| OrderLineRequest { product_id: i.product_id, name: i.name.clone(), price: i.price.clone(), qty: i.qty })
                .collect(),
            shipping: Some(ShippingRequest {
                zip: address.zip.trim().to_string(),
                street: address.street.trim().to_string(),
                number: address.number.trim().to_string(),
                complement: address.complement.trim().to_string(),
                district: address.district.trim().to_string(),
                city: address.city.trim().to_string(),
                state: address.state.trim().to_string(),
                method: quote.id.clone(),
                label: quote.label.clone(),
                price: quote.price.clone(),
                days: quote.days,
            }),
            totals: Some(TotalsRequest {
                subtotal: totals.subtotal.to_wire(),
                shipping: totals.shipping.to_wire(),
                total: totals.total.to_wire(),
            }),
        }
    }

    // The order (and payment) already exist at this point, so a storage
    // failure must not turn into a checkout error and a duplicate order.
    fn clear_cart(&self) {
        if let Err(e) = self.cart_store.clear_cart() {
            warn!(error = %e, "order placed but the cart could not be cleared");
        }
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.phase == CheckoutPhase::Done {
            return Err(self.fail_validation(CheckoutError::AlreadySubmitted));
        }
        Ok(())
    }

    fn fail_validation(&mut self, error: CheckoutError) -> StorefrontError {
        self.error = Some(error.to_string());
        error.into()
    }
}

impl<A: ?Sized> std::fmt::Debug for CheckoutController<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutController")
            .field("phase", &self.phase)
            .field("error", &self.error)
            .field("redirect", &self.redirect)
            .finish_non_exhaustive()
    }
}

/// Card step for gateway card payments: pays an existing order with the
/// token produced by the gateway's card widget.
#[instrument(skip(api, card))]
pub async fn pay_order_with_card<A: CheckoutApi + ?Sized>(api: &A, order_id: i64, card: CardDetails) -> Result<CheckoutRedirect> {
    let order = api.get_order(order_id).await?;
    if order.amount().amount() <= rust_decimal::Decimal::ZERO {
        return Err(CheckoutError::InvalidOrderAmount.into());
    }
    let request = CreatePaymentRequest::new(order.id, PaymentProvider::MercadoPago, PaymentMethod::Card).with_card(card);
    let payment = api.create_payment(request).await?;
    info!(order_id, payment_id = payment.id, "card payment created");
    Ok(CheckoutRedirect::PaymentStatus { order_id, payment_id: payment.id })
}

/// Starts a new payment for an order the signed-in customer already owns,
/// e.g. after an earlier attempt failed or expired.
#[instrument(skip(api))]
pub async fn pay_now(api: &ApiClient, order_id: i64, provider: PaymentProvider, method: PaymentMethod) -> Result<CheckoutRedirect> {
    let payment = api.pay_order(order_id, provider, method).await?;
    info!(order_id, payment_id = payment.id, "payment restarted");
    Ok(CheckoutRedirect::PaymentStatus { order_id, payment_id: payment.id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::cep::{CepAddress, MockAddressLookup};
    use crate::api::MockCheckoutApi;
    use crate::domain::aggregates::order::{OrderCreated, OrderPublic, OrderStatus};
    use crate::domain::aggregates::product::Product;
    use crate::storage::MemoryStorage;
    use crate::{Payment, PaymentStatus};
    use rust_decimal::Decimal;

    fn product(id: i64, price: &str) -> Product {
        Product { id, name: format!("P{id}"), slug: format!("p{id}"), price: price.into(), description: None, category: None, brand: None, images: vec![] }
    }

    fn filled_store() -> Arc<CartStore> {
        let store = Arc::new(CartStore::new(Arc::new(MemoryStorage::new())));
        store.add_to_cart(&product(1, "40.00"), 2).unwrap();
        store.add_to_cart(&product(2, "20.00"), 1).unwrap();
        store
    }

    fn quotes() -> Vec<ShippingQuote> {
        vec![
            ShippingQuote { id: "a".into(), label: "PAC".into(), price: "10.00".into(), days: 3 },
            ShippingQuote { id: "b".into(), label: "SEDEX".into(), price: "25.00".into(), days: 1 },
        ]
    }

    fn payment(id: i64, order: i64) -> Payment {
        Payment {
            id,
            order,
            provider: PaymentProvider::Dummy,
            method: PaymentMethod::Pix,
            status: PaymentStatus::Pending,
            amount: "110.00".into(),
            pix_qr_code: String::new(),
            pix_qr_code_base64: String::new(),
            pix_expires_at: None,
            created_at: None,
        }
    }

    fn fill_form<A: CheckoutApi + ?Sized>(controller: &mut CheckoutController<A>) {
        *controller.customer_mut() = CustomerInfo { full_name: "Ana Souza".into(), email: "ana@example.com".into(), phone: String::new() };
        controller.set_address(ShippingAddress {
            zip: "01310-100".into(),
            street: "Av. Paulista".into(),
            number: "1000".into(),
            complement: String::new(),
            district: "Bela Vista".into(),
            city: "São Paulo".into(),
            state: "SP".into(),
        });
    }

    fn api_with_quotes() -> MockCheckoutApi {
        let mut api = MockCheckoutApi::new();
        api.expect_quote_shipping().returning(|_| Ok(quotes()));
        api
    }

    #[tokio::test]
    async fn test_quote_auto_selects_first_option() {
        let mut api = MockCheckoutApi::new();
        api.expect_quote_shipping()
            .withf(|req| req.zip == "01310-100" && req.items == vec![QuoteItem { product_id: 1, qty: 2 }, QuoteItem { product_id: 2, qty: 1 }])
            .times(1)
            .returning(|_| Ok(quotes()));
        let mut controller = CheckoutController::new(Arc::new(api), filled_store());
        fill_form(&mut controller);

        controller.request_quotes().await.unwrap();

        assert_eq!(controller.phase(), CheckoutPhase::ReadyToSubmit);
        assert_eq!(controller.selected_quote().map(|q| q.id.as_str()), Some("a"));
        let totals = controller.totals();
        assert_eq!(totals.subtotal.amount(), Decimal::new(100, 0));
        assert_eq!(totals.total.amount(), Decimal::new(110, 0));
    }

    #[tokio::test]
    async fn test_empty_quote_set_blocks_submission() {
        let mut api = MockCheckoutApi::new();
        api.expect_quote_shipping().returning(|_| Ok(vec![]));
        api.expect_create_order().never();
        let mut controller = CheckoutController::new(Arc::new(api), filled_store());
        fill_form(&mut controller);

        assert!(controller.request_quotes().await.unwrap().is_empty());
        assert_eq!(controller.phase(), CheckoutPhase::Editing);
        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::NoShippingQuote)));
    }

    #[tokio::test]
    async fn test_quote_requires_zip_and_items() {
        let mut api = MockCheckoutApi::new();
        api.expect_quote_shipping().never();
        let api = Arc::new(api);

        let mut controller = CheckoutController::new(Arc::clone(&api), filled_store());
        let err = controller.request_quotes().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::MissingZip)));
        assert_eq!(controller.phase(), CheckoutPhase::Editing);
        assert_eq!(controller.error(), Some("Enter a ZIP code to quote shipping"));

        let empty = Arc::new(CartStore::new(Arc::new(MemoryStorage::new())));
        let mut controller = CheckoutController::new(api, empty);
        controller.set_zip("01310-100");
        let err = controller.request_quotes().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_cart_without_network() {
        let mut api = MockCheckoutApi::new();
        api.expect_create_order().never();
        api.expect_create_payment().never();
        let empty = Arc::new(CartStore::new(Arc::new(MemoryStorage::new())));
        let mut controller = CheckoutController::new(Arc::new(api), empty);
        fill_form(&mut controller);

        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::EmptyCart)));
        assert_eq!(controller.phase(), CheckoutPhase::Editing);
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_customer_without_network() {
        let mut api = api_with_quotes();
        api.expect_create_order().never();
        let mut controller = CheckoutController::new(Arc::new(api), filled_store());
        fill_form(&mut controller);
        controller.request_quotes().await.unwrap();
        controller.customer_mut().email = "  ".into();

        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::MissingCustomer)));
        assert_eq!(controller.phase(), CheckoutPhase::ReadyToSubmit);
        assert_eq!(controller.error(), Some("Fill in your name and e-mail"));
    }

    #[tokio::test]
    async fn test_submit_rejects_incomplete_address_without_network() {
        let mut api = api_with_quotes();
        api.expect_create_order().never();
        let mut controller = CheckoutController::new(Arc::new(api), filled_store());
        fill_form(&mut controller);
        controller.request_quotes().await.unwrap();
        let mut address = controller.draft().address.clone();
        address.number.clear();
        controller.set_address(address);

        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::IncompleteAddress)));
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_quote_without_network() {
        let mut api = MockCheckoutApi::new();
        api.expect_create_order().never();
        let mut controller = CheckoutController::new(Arc::new(api), filled_store());
        fill_form(&mut controller);

        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::NoShippingQuote)));
    }

    #[tokio::test]
    async fn test_successful_pix_checkout_clears_cart_after_payment() {
        let store = filled_store();
        let mut api = api_with_quotes();
        api.expect_create_order()
            .withf(|req| {
                let shipping = req.shipping.as_ref().unwrap();
                req.full_name == "Ana Souza"
                    && req.items.len() == 2
                    && shipping.method == "b"
                    && req.totals.as_ref().map(|t| t.total.as_str()) == Some("125.00")
            })
            .times(1)
            .returning(|_| Ok(OrderCreated { id: 42, status: OrderStatus::AwaitingPayment, subtotal: "100.00".into() }));
        api.expect_create_payment()
            .withf(|req| req.order_id == 42 && req.provider == PaymentProvider::Dummy && req.method == PaymentMethod::Pix && req.card.is_none())
            .times(1)
            .returning(|_| Ok(payment(7, 42)));

        let mut controller = CheckoutController::new(Arc::new(api), Arc::clone(&store));
        fill_form(&mut controller);
        controller.request_quotes().await.unwrap();
        controller.select_quote("b").unwrap();

        let redirect = controller.submit().await.unwrap();

        assert_eq!(redirect, CheckoutRedirect::PaymentStatus { order_id: 42, payment_id: 7 });
        assert_eq!(controller.phase(), CheckoutPhase::Done);
        assert!(store.get_cart().is_empty());

        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::AlreadySubmitted)));
    }

    #[tokio::test]
    async fn test_payment_failure_keeps_cart_and_allows_retry() {
        let store = filled_store();
        let before = store.get_cart();
        let mut api = api_with_quotes();
        api.expect_create_order()
            .times(1)
            .returning(|_| Ok(OrderCreated { id: 42, status: OrderStatus::AwaitingPayment, subtotal: "100.00".into() }));
        let mut attempts = 0;
        api.expect_create_payment().withf(|req| req.order_id == 42).times(2).returning(move |_| {
            attempts += 1;
            if attempts == 1 {
                Err(StorefrontError::Api { status: 400, message: "Falha ao criar pagamento: gateway offline".into() })
            } else {
                Ok(payment(8, 42))
            }
        });

        let mut controller = CheckoutController::new(Arc::new(api), Arc::clone(&store));
        fill_form(&mut controller);
        controller.request_quotes().await.unwrap();

        let err = controller.submit().await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(controller.phase(), CheckoutPhase::ReadyToSubmit);
        assert_eq!(controller.error(), Some("Could not complete checkout: Falha ao criar pagamento: gateway offline"));
        assert_eq!(controller.redirect(), None);
        assert_eq!(store.get_cart(), before);

        let redirect = controller.submit().await.unwrap();
        assert_eq!(redirect, CheckoutRedirect::PaymentStatus { order_id: 42, payment_id: 8 });
        assert_eq!(controller.phase(), CheckoutPhase::Done);
        assert_eq!(controller.error(), None);
        assert!(store.get_cart().is_empty());
    }

    #[tokio::test]
    async fn test_editing_the_draft_after_a_payment_failure_places_a_new_order() {
        let mut api = api_with_quotes();
        let mut next_order = 41;
        api.expect_create_order().times(2).returning(move |_| {
            next_order += 1;
            Ok(OrderCreated { id: next_order, status: OrderStatus::AwaitingPayment, subtotal: "100.00".into() })
        });
        let mut attempts = 0;
        api.expect_create_payment().times(2).returning(move |req| {
            attempts += 1;
            if attempts == 1 {
                Err(StorefrontError::Api { status: 502, message: "gateway offline".into() })
            } else {
                Ok(payment(9, req.order_id))
            }
        });

        let mut controller = CheckoutController::new(Arc::new(api), filled_store());
        fill_form(&mut controller);
        controller.request_quotes().await.unwrap();
        assert!(controller.submit().await.is_err());

        controller.select_quote("b").unwrap();
        let redirect = controller.submit().await.unwrap();
        assert_eq!(redirect, CheckoutRedirect::PaymentStatus { order_id: 43, payment_id: 9 });
    }

    #[tokio::test]
    async fn test_order_failure_keeps_cart() {
        let store = filled_store();
        let mut api = api_with_quotes();
        api.expect_create_order()
            .returning(|_| Err(StorefrontError::Api { status: 400, message: "Carrinho vazio.".into() }));
        api.expect_create_payment().never();

        let mut controller = CheckoutController::new(Arc::new(api), Arc::clone(&store));
        fill_form(&mut controller);
        controller.request_quotes().await.unwrap();

        assert!(controller.submit().await.is_err());
        assert_eq!(controller.phase(), CheckoutPhase::ReadyToSubmit);
        assert_eq!(controller.error(), Some("Could not complete checkout: Carrinho vazio."));
        assert_eq!(store.cart_count(), 3);
    }

    #[tokio::test]
    async fn test_gateway_card_defers_payment_to_card_step() {
        let store = filled_store();
        let mut api = api_with_quotes();
        api.expect_create_order()
            .returning(|_| Ok(OrderCreated { id: 51, status: OrderStatus::AwaitingPayment, subtotal: "100.00".into() }));
        api.expect_create_payment().never();

        let mut controller = CheckoutController::new(Arc::new(api), Arc::clone(&store));
        fill_form(&mut controller);
        controller.set_payment(PaymentProvider::MercadoPago, PaymentMethod::Card);
        controller.request_quotes().await.unwrap();

        let redirect = controller.submit().await.unwrap();
        assert_eq!(redirect, CheckoutRedirect::CardPayment { order_id: 51 });
        assert!(store.get_cart().is_empty());
    }

    #[tokio::test]
    async fn test_controller_uses_cart_snapshot() {
        let store = filled_store();
        let controller = CheckoutController::new(Arc::new(MockCheckoutApi::new()), Arc::clone(&store));
        store.clear_cart().unwrap();
        assert_eq!(controller.cart().count(), 3);
    }

    #[tokio::test]
    async fn test_zip_change_invalidates_quotes() {
        let mut controller = CheckoutController::new(Arc::new(api_with_quotes()), filled_store());
        fill_form(&mut controller);
        controller.request_quotes().await.unwrap();
        controller.set_zip("90010-000");
        assert!(controller.quotes().is_empty());
        assert_eq!(controller.phase(), CheckoutPhase::Editing);
    }

    #[tokio::test]
    async fn test_autofill_fills_address_and_tolerates_failures() {
        let mut lookup = MockAddressLookup::new();
        lookup.expect_lookup().times(1).returning(|_| {
            Ok(CepAddress {
                cep: "01310-100".into(),
                logradouro: "Avenida Paulista".into(),
                bairro: "Bela Vista".into(),
                localidade: "São Paulo".into(),
                uf: "SP".into(),
                ..CepAddress::default()
            })
        });
        let mut controller = CheckoutController::new(Arc::new(MockCheckoutApi::new()), filled_store());
        controller.set_zip("01310100");
        assert_eq!(controller.autofill_address(&lookup).await, None);
        assert_eq!(controller.draft().address.street, "Avenida Paulista");
        assert_eq!(controller.draft().address.state, "SP");

        let mut failing = MockAddressLookup::new();
        failing.expect_lookup().returning(|_| Err(StorefrontError::AddressNotFound));
        assert_eq!(controller.autofill_address(&failing).await.as_deref(), Some("No address found for this CEP"));
        assert_eq!(controller.draft().address.street, "Avenida Paulista");

        controller.set_zip("123");
        assert!(controller.autofill_address(&failing).await.is_some());
    }

    #[tokio::test]
    async fn test_card_step_creates_gateway_payment() {
        let mut api = MockCheckoutApi::new();
        api.expect_get_order().returning(|id| {
            Ok(OrderPublic { id, subtotal: "100.00".into(), status: OrderStatus::AwaitingPayment, email: "a@b.c".into(), full_name: "Ana".into() })
        });
        api.expect_create_payment()
            .withf(|req| req.provider == PaymentProvider::MercadoPago && req.method == PaymentMethod::Card && req.card.as_ref().map(|c| c.installments) == Some(3))
            .returning(|req| Ok(payment(70, req.order_id)));

        let card = CardDetails { token: "tok_1".into(), payment_method_id: "visa".into(), installments: 3, issuer_id: String::new() };
        let redirect = pay_order_with_card(&api, 51, card).await.unwrap();
        assert_eq!(redirect, CheckoutRedirect::PaymentStatus { order_id: 51, payment_id: 70 });
    }

    #[tokio::test]
    async fn test_card_step_rejects_zero_amount() {
        let mut api = MockCheckoutApi::new();
        api.expect_get_order().returning(|id| {
            Ok(OrderPublic { id, subtotal: "0.00".into(), status: OrderStatus::AwaitingPayment, email: "a@b.c".into(), full_name: "Ana".into() })
        });
        api.expect_create_payment().never();
        let card = CardDetails { token: "tok".into(), payment_method_id: "visa".into(), installments: 1, issuer_id: String::new() };
        let err = pay_order_with_card(&api, 1, card).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::InvalidOrderAmount)));
    }
}
