//! User registration. Account creation carries a cross-domain contract:
//! every new user gets exactly one cart, created in the same transaction.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 11, max = 14))]
    pub cpf: String,
}

/// `POST /users` — register a user and their cart atomically. Staff
/// accounts are provisioned out of band, never through this endpoint.
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<NewUser>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    input.validate()?;

    let mut tx = state.db.begin().await?;
    let user_id = Uuid::now_v7();

    sqlx::query(
        "INSERT INTO users (id, username, email, cpf, is_staff, created_at) \
         VALUES ($1, $2, $3, $4, FALSE, NOW())",
    )
    .bind(user_id)
    .bind(&input.username)
    .bind(&input.email)
    .bind(&input.cpf)
    .execute(&mut *tx)
    .await
    .map_err(unique_to_validation)?;

    sqlx::query("INSERT INTO carts (id, user_id, updated_at) VALUES ($1, $2, NOW())")
        .bind(Uuid::now_v7())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "User registered successfully!"})),
    ))
}

fn unique_to_validation(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref d) if d.is_unique_violation() => AppError::Validation(
            "A user with this username, email or CPF already exists.".into(),
        ),
        other => AppError::from(other),
    }
}
