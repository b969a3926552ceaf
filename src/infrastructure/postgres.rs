//! PostgreSQL adapters (sqlx). Schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, CartLine, Order, OrderLine, ShippingAddress};
use crate::domain::value_objects::{Money, OrderId, OrderNumber, OwnerId, ProductRef, Quantity, VariantLabel};
use crate::infrastructure::rate_limit::{decide, window_start};
use crate::ports::{CartStore, CatalogError, CatalogLookup, OrderStore, Page, RateDecision, RateLimiter, Resolution, StoreError};

const UNIQUE_VIOLATION: &str = "23505";

fn map_db(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => StoreError::Conflict(db.message().to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("corrupt {what} row: {detail}"))
}

#[derive(Clone, Debug)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: Uuid, owner_id: Uuid, status: String, order_id: Option<Uuid>, lines: Json<Vec<CartLine>>,
    total_items: i64, total_amount: Decimal, version: i64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = StoreError;
    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        Ok(Cart {
            id: row.id.into(),
            owner: row.owner_id.into(),
            lines: row.lines.0,
            status: row.status.parse().map_err(|e| corrupt("cart", e))?,
            linked_order: row.order_id.map(OrderId::from),
            total_items: Quantity::new(u32::try_from(row.total_items).map_err(|e| corrupt("cart", e))?),
            total_amount: Money::new(row.total_amount),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, owner_id: Uuid, lines: Json<Vec<OrderLine>>,
    subtotal: Decimal, shipping_cost: Decimal, tax: Decimal, total_amount: Decimal,
    order_status: String, payment_status: String, payment_intent: Option<String>,
    shipping_address: Option<Json<ShippingAddress>>, version: i64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id.into(),
            order_number: OrderNumber::parse(row.order_number),
            owner: row.owner_id.into(),
            lines: row.lines.0,
            subtotal: Money::new(row.subtotal),
            shipping_cost: Money::new(row.shipping_cost),
            tax: Money::new(row.tax),
            total_amount: Money::new(row.total_amount),
            order_status: row.order_status.parse().map_err(|e| corrupt("order", e))?,
            payment_status: row.payment_status.parse().map_err(|e| corrupt("order", e))?,
            payment_intent: row.payment_intent,
            shipping_address: row.shipping_address.map(|a| a.0),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const CART_COLUMNS: &str = "id, owner_id, status, order_id, lines, total_items, total_amount, version, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, order_number, owner_id, lines, subtotal, shipping_cost, tax, total_amount, order_status, payment_status, payment_intent, shipping_address, version, created_at, updated_at";

#[async_trait]
impl CartStore for PgStore {
    async fn find_open(&self, owner: OwnerId) -> Result<Option<Cart>, StoreError> {
        sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE owner_id = $1 AND status IN ('active', 'processing') \
             ORDER BY (status = 'active') DESC, updated_at DESC LIMIT 1"))
            .bind(owner.as_uuid()).fetch_optional(&self.pool).await.map_err(map_db)?
            .map(Cart::try_from).transpose()
    }

    async fn find_by_order(&self, order: OrderId) -> Result<Option<Cart>, StoreError> {
        sqlx::query_as::<_, CartRow>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE order_id = $1 LIMIT 1"))
            .bind(order.as_uuid()).fetch_optional(&self.pool).await.map_err(map_db)?
            .map(Cart::try_from).transpose()
    }

    async fn history(&self, owner: OwnerId) -> Result<Vec<Cart>, StoreError> {
        sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE owner_id = $1 AND status <> 'active' ORDER BY updated_at DESC"))
            .bind(owner.as_uuid()).fetch_all(&self.pool).await.map_err(map_db)?
            .into_iter().map(Cart::try_from).collect()
    }

    async fn insert(&self, cart: &Cart) -> Result<Cart, StoreError> {
        sqlx::query_as::<_, CartRow>(&format!(
            "INSERT INTO carts ({CART_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9) RETURNING {CART_COLUMNS}"))
            .bind(cart.id.as_uuid()).bind(cart.owner.as_uuid()).bind(cart.status.as_str())
            .bind(cart.linked_order.map(|o| o.as_uuid())).bind(Json(&cart.lines))
            .bind(i64::from(cart.total_items.value())).bind(cart.total_amount.amount())
            .bind(cart.created_at).bind(cart.updated_at)
            .fetch_one(&self.pool).await.map_err(map_db)
            .and_then(Cart::try_from)
    }

    async fn save(&self, cart: &Cart) -> Result<Cart, StoreError> {
        sqlx::query_as::<_, CartRow>(&format!(
            "UPDATE carts SET status = $3, order_id = $4, lines = $5, total_items = $6, total_amount = $7, \
             version = version + 1, updated_at = $8 WHERE id = $1 AND version = $2 RETURNING {CART_COLUMNS}"))
            .bind(cart.id.as_uuid()).bind(cart.version).bind(cart.status.as_str())
            .bind(cart.linked_order.map(|o| o.as_uuid())).bind(Json(&cart.lines))
            .bind(i64::from(cart.total_items.value())).bind(cart.total_amount.amount()).bind(cart.updated_at)
            .fetch_optional(&self.pool).await.map_err(map_db)?
            .ok_or_else(|| StoreError::Conflict(format!("cart {} changed since it was read", cart.id)))
            .and_then(Cart::try_from)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, order: &Order) -> Result<Order, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1, $13, $14) \
             RETURNING {ORDER_COLUMNS}"))
            .bind(order.id.as_uuid()).bind(order.order_number.as_str()).bind(order.owner.as_uuid()).bind(Json(&order.lines))
            .bind(order.subtotal.amount()).bind(order.shipping_cost.amount()).bind(order.tax.amount()).bind(order.total_amount.amount())
            .bind(order.order_status.as_str()).bind(order.payment_status.as_str()).bind(order.payment_intent.as_deref())
            .bind(order.shipping_address.as_ref().map(Json)).bind(order.created_at).bind(order.updated_at)
            .fetch_one(&self.pool).await.map_err(map_db)
            .and_then(Order::try_from)
    }

    async fn save(&self, order: &Order) -> Result<Order, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET shipping_cost = $3, tax = $4, total_amount = $5, order_status = $6, payment_status = $7, \
             payment_intent = $8, shipping_address = $9, version = version + 1, updated_at = $10 \
             WHERE id = $1 AND version = $2 RETURNING {ORDER_COLUMNS}"))
            .bind(order.id.as_uuid()).bind(order.version)
            .bind(order.shipping_cost.amount()).bind(order.tax.amount()).bind(order.total_amount.amount())
            .bind(order.order_status.as_str()).bind(order.payment_status.as_str()).bind(order.payment_intent.as_deref())
            .bind(order.shipping_address.as_ref().map(Json)).bind(order.updated_at)
            .fetch_optional(&self.pool).await.map_err(map_db)?
            .ok_or_else(|| StoreError::Conflict(format!("order {} changed since it was read", order.id)))
            .and_then(Order::try_from)
    }

    async fn find(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid()).fetch_optional(&self.pool).await.map_err(map_db)?
            .map(Order::try_from).transpose()
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"))
            .bind(number.as_str()).fetch_optional(&self.pool).await.map_err(map_db)?
            .map(Order::try_from).transpose()
    }

    async fn find_by_payment_intent(&self, intent: &str) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_intent = $1"))
            .bind(intent).fetch_optional(&self.pool).await.map_err(map_db)?
            .map(Order::try_from).transpose()
    }

    async fn list_for_owner(&self, owner: OwnerId, page: Page) -> Result<(Vec<Order>, u64), StoreError> {
        let offset = i64::try_from(page.offset()).map_err(|e| StoreError::Backend(e.to_string()))?;
        let orders = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"))
            .bind(owner.as_uuid()).bind(i64::from(page.per_page)).bind(offset)
            .fetch_all(&self.pool).await.map_err(map_db)?
            .into_iter().map(Order::try_from).collect::<Result<Vec<_>, _>>()?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE owner_id = $1")
            .bind(owner.as_uuid()).fetch_one(&self.pool).await.map_err(map_db)?;
        Ok((orders, u64::try_from(total.0).unwrap_or(0)))
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Clone, Debug)]
pub struct PgCatalog { pool: PgPool }

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn stock(raw: Option<i32>) -> Option<u32> { raw.map(|s| u32::try_from(s).unwrap_or(0)) }

#[async_trait]
impl CatalogLookup for PgCatalog {
    async fn resolve(&self, product: ProductRef, variant: &VariantLabel) -> Result<Resolution, CatalogError> {
        let row: Option<(Decimal, Option<i32>, bool)> = sqlx::query_as("SELECT price, stock, is_active FROM products WHERE id = $1")
            .bind(product.as_uuid()).fetch_optional(&self.pool).await
            .map_err(|e| CatalogError(e.to_string()))?;
        let Some((price, product_stock, is_active)) = row else { return Ok(Resolution::NotFound) };
        if !is_active { return Ok(Resolution::Inactive); }
        let Some(name) = variant.as_deref() else {
            return Ok(Resolution::Available { unit_price: Money::new(price), stock: stock(product_stock) });
        };
        let variant_row: Option<(Decimal, Option<i32>)> = sqlx::query_as("SELECT price, stock FROM product_variants WHERE product_id = $1 AND name = $2")
            .bind(product.as_uuid()).bind(name).fetch_optional(&self.pool).await
            .map_err(|e| CatalogError(e.to_string()))?;
        Ok(match variant_row {
            Some((price, variant_stock)) => Resolution::Available { unit_price: Money::new(price), stock: stock(variant_stock) },
            None => Resolution::VariantNotFound,
        })
    }
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Fixed-window counter in `rate_limit_windows`, shared by every instance on the database.
#[derive(Clone, Debug)]
pub struct PgRateLimiter { pool: PgPool, limit: u32, window: Duration }

impl PgRateLimiter {
    pub fn new(pool: PgPool, limit: u32, window: Duration) -> Self { Self { pool, limit, window } }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn hit(&self, key: &str) -> Result<RateDecision, StoreError> {
        let now = Utc::now();
        let start = window_start(now, self.window);
        let (hits,): (i32,) = sqlx::query_as(
            "INSERT INTO rate_limit_windows (key, window_start, hits) VALUES ($1, $2, 1) \
             ON CONFLICT (key, window_start) DO UPDATE SET hits = rate_limit_windows.hits + 1 RETURNING hits")
            .bind(key).bind(start).fetch_one(&self.pool).await.map_err(map_db)?;
        if hits == 1 {
            let expired = start - chrono::Duration::hours(1);
            if let Err(e) = sqlx::query("DELETE FROM rate_limit_windows WHERE window_start < $1").bind(expired).execute(&self.pool).await {
                tracing::debug!(error = %e, "rate limit window cleanup failed");
            }
        }
        Ok(decide(u32::try_from(hits).unwrap_or(u32::MAX), self.limit, start, self.window, now))
    }
}
