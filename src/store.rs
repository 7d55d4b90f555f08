//! Persistent, observable cart.
//!
//! The cart lives in key-value storage under [`CART_STORAGE_KEY`] as a
//! versioned envelope:
//!
//! ```json
//! {"version": 1, "revision": 12, "items": [{"productId": 1, "slug": "...", "qty": 2, ...}]}
//! ```
//!
//! Earlier clients stored the bare item array under the same key; that form
//! is read as version 0 and rewritten as an envelope on the next mutation.
//! Anything unreadable decodes to an empty cart.
//!
//! Writers in other processes are not coordinated: every mutation re-reads
//! storage and the last writer wins. `revision` only tells readers that the
//! cart moved.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::domain::aggregates::cart::{Cart, CartItem};
use crate::domain::aggregates::product::Product;
use crate::domain::events::{CartEvent, EventBus, Subscription};
use crate::domain::value_objects::Quantity;
use crate::storage::KeyValueStorage;
use crate::Result;

pub const CART_STORAGE_KEY: &str = "ecom_cart_v1";
pub const CART_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    revision: u64,
    items: &'a [CartItem],
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Default)]
struct Snapshot {
    revision: u64,
    cart: Cart,
}

pub struct CartStore {
    storage: Arc<dyn KeyValueStorage>,
    events: EventBus<CartEvent>,
    write_lock: Mutex<()>,
}

impl CartStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage, events: EventBus::new(), write_lock: Mutex::new(()) }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CartEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// Current items in insertion order. Never fails.
    pub fn get_cart(&self) -> Vec<CartItem> { self.load().cart.into_items() }

    pub fn snapshot(&self) -> Cart { self.load().cart }

    pub fn revision(&self) -> u64 { self.load().revision }

    pub fn add_to_cart(&self, product: &Product, qty: i64) -> Result<()> {
        self.mutate(|cart| {
            let qty = cart.add_item(CartItem::from_product(product, Quantity::default()), qty);
            Some(CartEvent::ItemAdded { product_id: product.id, qty })
        })
    }

    pub fn remove_from_cart(&self, product_id: i64) -> Result<()> {
        self.mutate(|cart| cart.remove_item(product_id).then_some(CartEvent::ItemRemoved { product_id }))
    }

    pub fn set_qty(&self, product_id: i64, qty: i64) -> Result<()> {
        self.mutate(|cart| cart.set_quantity(product_id, qty).map(|qty| CartEvent::QuantityChanged { product_id, qty }))
    }

    /// Always persists and notifies, even when the cart is already empty.
    pub fn clear_cart(&self) -> Result<()> {
        self.mutate(|cart| {
            cart.clear();
            Some(CartEvent::Cleared)
        })
    }

    pub fn cart_count(&self) -> u32 { self.load().cart.count() }

    pub fn cart_total(&self) -> Decimal { self.load().cart.total_amount() }

    /// Read-modify-write. `apply` returns `None` when nothing changed, in which
    /// case storage is left alone and no event fires.
    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Cart) -> Option<CartEvent>,
    {
        let event = {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut snapshot = self.load();
            let Some(event) = apply(&mut snapshot.cart) else { return Ok(()) };
            let revision = snapshot.revision + 1;
            let payload = serde_json::to_string(&EnvelopeRef {
                version: CART_SCHEMA_VERSION,
                revision,
                items: snapshot.cart.items(),
            })?;
            self.storage.set(CART_STORAGE_KEY, &payload)?;
            debug!(?event, revision, "cart updated");
            event
        };
        self.events.emit(&event);
        Ok(())
    }

    fn load(&self) -> Snapshot {
        let raw = match self.storage.get(CART_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Snapshot::default(),
            Err(e) => {
                warn!(error = %e, "cart storage unreadable, using empty cart");
                return Snapshot::default();
            }
        };
        decode(&raw)
    }
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore").field("events", &self.events).finish_non_exhaustive()
    }
}

fn decode(raw: &str) -> Snapshot {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "corrupt cart payload, using empty cart");
            return Snapshot::default();
        }
    };
    match value {
        Value::Array(items) => Snapshot { revision: 0, cart: decode_items(items) },
        Value::Object(_) => match serde_json::from_value::<Envelope>(value) {
            Ok(envelope) if envelope.version == CART_SCHEMA_VERSION => {
                Snapshot { revision: envelope.revision, cart: decode_items(envelope.items) }
            }
            Ok(envelope) => {
                warn!(version = envelope.version, "unsupported cart schema version, using empty cart");
                Snapshot::default()
            }
            Err(e) => {
                warn!(error = %e, "malformed cart envelope, using empty cart");
                Snapshot::default()
            }
        },
        _ => {
            warn!("unexpected cart payload shape, using empty cart");
            Snapshot::default()
        }
    }
}

fn decode_items(items: Vec<Value>) -> Cart {
    Cart::from_items(items.into_iter().filter_map(|item| match serde_json::from_value::<CartItem>(item) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!(error = %e, "dropping malformed cart item");
            None
        }
    }))
}
