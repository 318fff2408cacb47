//! Product catalog: staff-gated CRUD plus the read-only filter queries.

use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::Caller;
use crate::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub description: String,
    pub price: Decimal,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom = "non_negative")]
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub stock: i32,
}

fn non_negative(price: &Decimal) -> std::result::Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("min_value"));
    }
    Ok(())
}

/// Query parameters accepted by `GET /products`. All optional; when any
/// is present the listing switches to filter semantics (404 on empty).
#[derive(Debug, Default, Deserialize)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub name: Option<String>,
}

impl ProductFilter {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
            && self.name.is_none()
    }

    pub fn check(&self) -> Result<()> {
        if matches!(&self.category, Some(c) if c.trim().is_empty()) {
            return Err(AppError::Validation(
                "Category parameter is required.".into(),
            ));
        }
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err(AppError::Validation("Name parameter is required.".into()));
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(AppError::Validation(
                    "Min price parameter must be lower than Max price parameter.".into(),
                ));
            }
        }
        Ok(())
    }
}

/// `Query<ProductFilter>` with the rejection routed through the error
/// taxonomy, so a malformed parameter comes back as the same
/// `{"detail": ...}` body as every other validation failure.
#[derive(Debug)]
pub struct ProductQuery(pub ProductFilter);

#[async_trait]
impl<S> FromRequestParts<S> for ProductQuery
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Query(filter) = Query::<ProductFilter>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        Ok(Self(filter))
    }
}

/// Escapes `%`, `_` and `\` so a search term only ever matches as a
/// literal substring inside the ILIKE pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub async fn list_products(
    State(state): State<AppState>,
    ProductQuery(filter): ProductQuery,
) -> Result<Json<Vec<Product>>> {
    filter.check()?;

    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products \
         WHERE ($1::text IS NULL OR category = $1) \
           AND ($2::numeric IS NULL OR price >= $2) \
           AND ($3::numeric IS NULL OR price <= $3) \
           AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%') \
         ORDER BY created_at, id",
    )
    .bind(&filter.category)
    .bind(filter.min_price)
    .bind(filter.max_price)
    .bind(filter.name.as_deref().map(escape_like))
    .fetch_all(&state.db)
    .await?;

    // A filtered query that matches nothing is a miss, not an empty page.
    if products.is_empty() && !filter.is_empty() {
        let detail = match &filter.category {
            Some(category) => format!("No products found for category {category}"),
            None => "No products found.".to_string(),
        };
        return Err(AppError::NotFound(detail));
    }

    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Not found.".into()))
}

pub async fn create_product(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<ProductInput>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    caller.require_staff()?;
    input.validate()?;

    sqlx::query(
        "INSERT INTO products (id, name, category, description, price, stock, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())",
    )
    .bind(Uuid::now_v7())
    .bind(&input.name)
    .bind(&input.category)
    .bind(&input.description)
    .bind(input.price)
    .bind(input.stock)
    .execute(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "Product registered successfully."})),
    ))
}

pub async fn update_product(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> Result<Json<Product>> {
    caller.require_staff()?;
    input.validate()?;

    sqlx::query_as::<_, Product>(
        "UPDATE products SET name = $2, category = $3, description = $4, \
         price = $5, stock = $6, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&input.name)
    .bind(&input.category)
    .bind(&input.description)
    .bind(input.price)
    .bind(input.stock)
    .fetch_optional(&state.db)
    .await?
    .map(Json)
    .ok_or_else(|| AppError::NotFound("Not found.".into()))
}

/// Deleting a product cascades at the store level: dependent cart line
/// items vanish with it (`ON DELETE CASCADE` on `cart_items.product_id`).
pub async fn delete_product(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    caller.require_staff()?;

    let deleted = sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::NotFound("Not found.".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn empty_filter_passes() {
        assert!(ProductFilter::default().check().is_ok());
        assert!(ProductFilter::default().is_empty());
    }

    #[test]
    fn inverted_price_range_is_rejected() {
        let filter = ProductFilter {
            min_price: Some(price("200")),
            max_price: Some(price("100")),
            ..Default::default()
        };
        assert!(matches!(filter.check(), Err(AppError::Validation(_))));
    }

    #[test]
    fn equal_price_bounds_pass() {
        let filter = ProductFilter {
            min_price: Some(price("100")),
            max_price: Some(price("100")),
            ..Default::default()
        };
        assert!(filter.check().is_ok());
        assert!(!filter.is_empty());
    }

    #[test]
    fn single_price_bound_passes() {
        let filter = ProductFilter {
            max_price: Some(price("100")),
            ..Default::default()
        };
        assert!(filter.check().is_ok());
    }

    #[test]
    fn blank_category_is_rejected() {
        let filter = ProductFilter {
            category: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(filter.check(), Err(AppError::Validation(_))));
    }

    #[test]
    fn blank_name_is_rejected() {
        let filter = ProductFilter {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(filter.check(), Err(AppError::Validation(_))));
    }

    #[test]
    fn escape_like_neutralises_wildcards() {
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("plain name"), "plain name");
    }

    #[tokio::test]
    async fn malformed_query_param_maps_to_validation_error() {
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/products?min_price=abc")
            .body(())
            .unwrap()
            .into_parts();
        let err = ProductQuery::from_request_parts(&mut parts, &())
            .await
            .expect_err("non-numeric bound must be rejected");
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn well_formed_query_param_is_accepted() {
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/products?min_price=10.50&category=Tools")
            .body(())
            .unwrap()
            .into_parts();
        let ProductQuery(filter) = ProductQuery::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(filter.min_price, Some(price("10.50")));
        assert_eq!(filter.category.as_deref(), Some("Tools"));
    }

    #[test]
    fn negative_price_fails_validation() {
        let input = ProductInput {
            name: "Widget".into(),
            category: "Tools".into(),
            description: String::new(),
            price: price("-1.00"),
            stock: 5,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn zero_price_passes_validation() {
        let input = ProductInput {
            name: "Freebie".into(),
            category: "Promo".into(),
            description: String::new(),
            price: Decimal::ZERO,
            stock: 0,
        };
        assert!(input.validate().is_ok());
    }
}
