//! The cart engine: merge-on-add, reduce-quantity and read-time totals.
//!
//! Every mutation runs as a single transaction. The caller's cart row is
//! locked (`FOR UPDATE`) before line items are touched, which serialises
//! concurrent add/reduce traffic for one cart without any in-process
//! locking. Line-item uniqueness per (cart, product) is maintained here,
//! on the add path, rather than by a database constraint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use crate::auth::Caller;
use crate::catalog::Product;
use crate::error::{AppError, Result};
use crate::AppState;

/// Line item joined with its product, as read from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CartItemDetail {
    pub item_id: Uuid,
    pub cart_id: Uuid,
    pub quantity: i32,
    #[sqlx(flatten)]
    pub product: Product,
}

impl CartItemDetail {
    /// Line subtotal at current pricing, in exact decimals.
    pub fn subtotal(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }

    fn into_response(self) -> CartItemResponse {
        CartItemResponse {
            id: self.item_id,
            cart: self.cart_id,
            product: self.product.id,
            quantity: self.quantity,
            subtotal: self.subtotal(),
            product_details: self.product,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub id: Uuid,
    pub cart: Uuid,
    pub product: Uuid,
    pub quantity: i32,
    pub subtotal: Decimal,
    pub product_details: Product,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub id: Uuid,
    pub user: Uuid,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<CartItemResponse>,
    pub total: Decimal,
}

/// Cart total = Σ quantity × unit price over all items, computed at read
/// time so it always reflects current catalog pricing.
pub fn cart_total(items: &[CartItemDetail]) -> Decimal {
    items.iter().map(CartItemDetail::subtotal).sum()
}

/// Outcome of one reduce-quantity step on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOutcome {
    /// Still at least one left: decrement and keep the row.
    Reduced(i32),
    /// Was exactly one: the row is deleted.
    Removed,
    /// Below one already; unreachable while the quantity invariant holds.
    Rejected,
}

impl ReduceOutcome {
    pub fn for_quantity(quantity: i32) -> Self {
        if quantity > 1 {
            Self::Reduced(quantity - 1)
        } else if quantity == 1 {
            Self::Removed
        } else {
            Self::Rejected
        }
    }
}

/// Decision taken by the add path for one (cart, product) pair: merge
/// into the row that already holds the product, or insert the first row.
/// An existing row is never duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddAction {
    Merge { item_id: Uuid, new_quantity: i32 },
    Insert,
}

impl AddAction {
    pub fn resolve(existing: Option<(Uuid, i32)>, added: i32) -> Self {
        match existing {
            Some((item_id, current)) => Self::Merge {
                item_id,
                new_quantity: current.saturating_add(added),
            },
            None => Self::Insert,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewCartItem {
    pub product: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1))]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateCartItem {
    pub product: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: Option<i32>,
}

const ITEM_SELECT: &str = "SELECT ci.id AS item_id, ci.cart_id, ci.quantity, \
     p.id, p.name, p.category, p.description, p.price, p.stock, p.created_at, p.updated_at \
     FROM cart_items ci JOIN products p ON p.id = ci.product_id";

/// Locks the caller's cart row and returns its id.
async fn lock_cart(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<Uuid> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM carts WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Cart not found.".into()))
}

async fn touch_cart(tx: &mut Transaction<'_, Postgres>, cart_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
        .bind(cart_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Fetches one line item the caller is allowed to see. Ownership failures
/// surface as 404 so other users' items stay invisible.
async fn fetch_owned_item(db: &sqlx::PgPool, caller: &Caller, id: Uuid) -> Result<CartItemDetail> {
    let sql = format!(
        "{ITEM_SELECT} JOIN carts c ON c.id = ci.cart_id \
         WHERE ci.id = $1 AND ($2 OR c.user_id = $3)"
    );
    sqlx::query_as::<_, CartItemDetail>(&sql)
        .bind(id)
        .bind(caller.is_staff)
        .bind(caller.id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Not found.".into()))
}

/// Locks a caller-owned line item inside a transaction and returns
/// (item id, cart id, quantity).
async fn lock_owned_item(
    tx: &mut Transaction<'_, Postgres>,
    caller: &Caller,
    id: Uuid,
) -> Result<(Uuid, Uuid, i32)> {
    sqlx::query_as::<_, (Uuid, Uuid, i32)>(
        "SELECT ci.id, ci.cart_id, ci.quantity FROM cart_items ci \
         JOIN carts c ON c.id = ci.cart_id \
         WHERE ci.id = $1 AND ($2 OR c.user_id = $3) FOR UPDATE OF ci",
    )
    .bind(id)
    .bind(caller.is_staff)
    .bind(caller.id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Not found.".into()))
}

/// `POST /cart-items` — add a product to the caller's cart. Adding a
/// product already in the cart merges into the existing row instead of
/// inserting a duplicate or rejecting with a conflict.
pub async fn add_item(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<NewCartItem>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    input.validate()?;

    let mut tx = state.db.begin().await?;

    let product_id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM products WHERE id = $1")
        .bind(input.product)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found.".into()))?;

    let cart_id = lock_cart(&mut tx, caller.id).await?;

    let existing = sqlx::query_as::<_, (Uuid, i32)>(
        "SELECT id, quantity FROM cart_items WHERE cart_id = $1 AND product_id = $2",
    )
    .bind(cart_id)
    .bind(product_id)
    .fetch_optional(&mut *tx)
    .await?;

    match AddAction::resolve(existing, input.quantity) {
        AddAction::Merge { item_id, new_quantity } => {
            sqlx::query("UPDATE cart_items SET quantity = $2 WHERE id = $1")
                .bind(item_id)
                .bind(new_quantity)
                .execute(&mut *tx)
                .await?;
        }
        AddAction::Insert => {
            sqlx::query(
                "INSERT INTO cart_items (id, cart_id, product_id, quantity, created_at) \
                 VALUES ($1, $2, $3, $4, NOW())",
            )
            .bind(Uuid::now_v7())
            .bind(cart_id)
            .bind(product_id)
            .bind(input.quantity)
            .execute(&mut *tx)
            .await?;
        }
    }

    touch_cart(&mut tx, cart_id).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "Item added successfully."})),
    ))
}

/// `GET /cart-items` — the caller's items in insertion order; staff see
/// every cart's items.
pub async fn list_items(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<CartItemResponse>>> {
    let items = if caller.is_staff {
        let sql = format!("{ITEM_SELECT} ORDER BY ci.created_at, ci.id");
        sqlx::query_as::<_, CartItemDetail>(&sql)
            .fetch_all(&state.db)
            .await?
    } else {
        let sql = format!(
            "{ITEM_SELECT} JOIN carts c ON c.id = ci.cart_id \
             WHERE c.user_id = $1 ORDER BY ci.created_at, ci.id"
        );
        sqlx::query_as::<_, CartItemDetail>(&sql)
            .bind(caller.id)
            .fetch_all(&state.db)
            .await?
    };

    Ok(Json(
        items.into_iter().map(CartItemDetail::into_response).collect(),
    ))
}

/// `GET /cart-items/{id}`
pub async fn get_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<CartItemResponse>> {
    let item = fetch_owned_item(&state.db, &caller, id).await?;
    Ok(Json(item.into_response()))
}

/// `PUT`/`PATCH /cart-items/{id}` — replace product and/or quantity in
/// place. Never merges with an existing row for the new product; merge
/// semantics belong to the add path only.
pub async fn update_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateCartItem>,
) -> Result<Json<CartItemResponse>> {
    input.validate()?;

    let mut tx = state.db.begin().await?;
    let (item_id, cart_id, _) = lock_owned_item(&mut tx, &caller, id).await?;

    if let Some(product) = input.product {
        let known = sqlx::query_scalar::<_, Uuid>("SELECT id FROM products WHERE id = $1")
            .bind(product)
            .fetch_optional(&mut *tx)
            .await?;
        if known.is_none() {
            return Err(AppError::NotFound("Product not found.".into()));
        }
    }

    sqlx::query(
        "UPDATE cart_items SET product_id = COALESCE($2, product_id), \
         quantity = COALESCE($3, quantity) WHERE id = $1",
    )
    .bind(item_id)
    .bind(input.product)
    .bind(input.quantity)
    .execute(&mut *tx)
    .await?;

    touch_cart(&mut tx, cart_id).await?;

    // Read the result back under the row lock so the response reflects
    // exactly what this transaction wrote, whatever lands afterwards.
    let sql = format!("{ITEM_SELECT} WHERE ci.id = $1");
    let item = sqlx::query_as::<_, CartItemDetail>(&sql)
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Json(item.into_response()))
}

/// `DELETE /cart-items/{id}` — unconditional removal, whatever the
/// remaining quantity.
pub async fn delete_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let mut tx = state.db.begin().await?;
    let (item_id, cart_id, _) = lock_owned_item(&mut tx, &caller, id).await?;

    sqlx::query("DELETE FROM cart_items WHERE id = $1")
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

    touch_cart(&mut tx, cart_id).await?;
    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /cart-items/{id}/reduce-quantity` — one step of the per-item
/// state machine: decrement while more than one remains, delete the row
/// on the last unit, reject a quantity that is already below one.
pub async fn reduce_quantity(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let mut tx = state.db.begin().await?;
    let (item_id, cart_id, quantity) = lock_owned_item(&mut tx, &caller, id).await?;

    let response = match ReduceOutcome::for_quantity(quantity) {
        ReduceOutcome::Reduced(remaining) => {
            sqlx::query("UPDATE cart_items SET quantity = $2 WHERE id = $1")
                .bind(item_id)
                .bind(remaining)
                .execute(&mut *tx)
                .await?;
            (
                StatusCode::OK,
                Json(json!({"message": "Item quantity reduced.", "quantity": remaining})),
            )
                .into_response()
        }
        ReduceOutcome::Removed => {
            sqlx::query("DELETE FROM cart_items WHERE id = $1")
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
            StatusCode::NO_CONTENT.into_response()
        }
        ReduceOutcome::Rejected => {
            return Err(AppError::Validation(
                "Item quantity is already below the minimum.".into(),
            ));
        }
    };

    touch_cart(&mut tx, cart_id).await?;
    tx.commit().await?;
    Ok(response)
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    user_id: Uuid,
    updated_at: DateTime<Utc>,
}

/// `GET /carts/{id}` — cart detail with nested items and the computed
/// total. Owner or staff only; anyone else gets a 404.
pub async fn get_cart(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<CartResponse>> {
    let cart = sqlx::query_as::<_, CartRow>(
        "SELECT id, user_id, updated_at FROM carts WHERE id = $1 AND ($2 OR user_id = $3)",
    )
    .bind(id)
    .bind(caller.is_staff)
    .bind(caller.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Not found.".into()))?;

    let sql = format!("{ITEM_SELECT} WHERE ci.cart_id = $1 ORDER BY ci.created_at, ci.id");
    let items = sqlx::query_as::<_, CartItemDetail>(&sql)
        .bind(cart.id)
        .fetch_all(&state.db)
        .await?;

    let total = cart_total(&items);
    Ok(Json(CartResponse {
        id: cart.id,
        user: cart.user_id,
        updated_at: cart.updated_at,
        items: items.into_iter().map(CartItemDetail::into_response).collect(),
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i32, price: &str) -> CartItemDetail {
        let now = Utc::now();
        CartItemDetail {
            item_id: Uuid::now_v7(),
            cart_id: Uuid::now_v7(),
            quantity,
            product: Product {
                id: Uuid::now_v7(),
                name: "Widget".into(),
                category: "Tools".into(),
                description: String::new(),
                price: price.parse().unwrap(),
                stock: 10,
                created_at: now,
                updated_at: now,
            },
        }
    }

    #[test]
    fn subtotal_is_exact() {
        assert_eq!(item(4, "99.99").subtotal(), "399.96".parse().unwrap());
    }

    #[test]
    fn total_sums_line_subtotals_exactly() {
        let items = vec![item(4, "99.99"), item(1, "49.99")];
        assert_eq!(cart_total(&items), "449.95".parse().unwrap());
    }

    #[test]
    fn total_of_empty_cart_is_zero() {
        assert_eq!(cart_total(&[]), Decimal::ZERO);
    }

    #[test]
    fn reduce_decrements_above_one() {
        assert_eq!(ReduceOutcome::for_quantity(4), ReduceOutcome::Reduced(3));
        assert_eq!(ReduceOutcome::for_quantity(2), ReduceOutcome::Reduced(1));
    }

    #[test]
    fn reduce_removes_the_last_unit() {
        assert_eq!(ReduceOutcome::for_quantity(1), ReduceOutcome::Removed);
    }

    #[test]
    fn reduce_rejects_invalid_quantities() {
        assert_eq!(ReduceOutcome::for_quantity(0), ReduceOutcome::Rejected);
        assert_eq!(ReduceOutcome::for_quantity(-3), ReduceOutcome::Rejected);
    }

    #[test]
    fn repeated_reduction_walks_down_to_removal() {
        let mut quantity = 4;
        for expected in [3, 2, 1] {
            match ReduceOutcome::for_quantity(quantity) {
                ReduceOutcome::Reduced(remaining) => {
                    assert_eq!(remaining, expected);
                    quantity = remaining;
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(ReduceOutcome::for_quantity(quantity), ReduceOutcome::Removed);
    }

    #[test]
    fn first_add_inserts_a_new_row() {
        assert_eq!(AddAction::resolve(None, 3), AddAction::Insert);
    }

    #[test]
    fn adding_an_existing_product_merges_quantities() {
        let item_id = Uuid::now_v7();
        assert_eq!(
            AddAction::resolve(Some((item_id, 2)), 3),
            AddAction::Merge {
                item_id,
                new_quantity: 5
            }
        );
    }

    #[test]
    fn second_add_lands_on_the_existing_row() {
        let item_id = Uuid::now_v7();
        match AddAction::resolve(Some((item_id, 1)), 1) {
            AddAction::Merge { item_id: target, new_quantity } => {
                assert_eq!(target, item_id);
                assert_eq!(new_quantity, 2);
            }
            AddAction::Insert => panic!("existing product must never gain a second row"),
        }
    }

    #[test]
    fn merge_saturates_instead_of_overflowing() {
        let item_id = Uuid::now_v7();
        assert_eq!(
            AddAction::resolve(Some((item_id, i32::MAX)), 1),
            AddAction::Merge {
                item_id,
                new_quantity: i32::MAX
            }
        );
    }

    #[test]
    fn item_response_reflects_the_row_it_maps() {
        let detail = item(7, "12.50");
        let item_id = detail.item_id;
        let cart_id = detail.cart_id;
        let product_id = detail.product.id;
        let response = detail.into_response();
        assert_eq!(response.id, item_id);
        assert_eq!(response.cart, cart_id);
        assert_eq!(response.product, product_id);
        assert_eq!(response.quantity, 7);
        assert_eq!(response.subtotal, "87.50".parse().unwrap());
    }

    #[test]
    fn new_item_quantity_defaults_to_one() {
        let input: NewCartItem =
            serde_json::from_value(json!({"product": Uuid::now_v7()})).unwrap();
        assert_eq!(input.quantity, 1);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn new_item_rejects_non_positive_quantity() {
        let zero: NewCartItem =
            serde_json::from_value(json!({"product": Uuid::now_v7(), "quantity": 0})).unwrap();
        assert!(zero.validate().is_err());

        let negative: NewCartItem =
            serde_json::from_value(json!({"product": Uuid::now_v7(), "quantity": -2})).unwrap();
        assert!(negative.validate().is_err());
    }

    #[test]
    fn update_rejects_zero_quantity() {
        let input = UpdateCartItem {
            product: None,
            quantity: Some(0),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn update_with_no_quantity_passes() {
        let input = UpdateCartItem {
            product: Some(Uuid::now_v7()),
            quantity: None,
        };
        assert!(input.validate().is_ok());
    }
}
