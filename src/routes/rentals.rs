use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::{require_operator, require_user, Role},
    error::{AppError, AppResult},
    models::Rental,
    schemas::{
        clamp_limit_in_range, validate_input, CancelRentalInput, CreateRentalInput, RentalsQuery,
    },
    services::{reconciler, rental_lifecycle},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/rentals",
            axum::routing::get(list_rentals).post(create_rental),
        )
        .route("/rentals/{rental_id}", axum::routing::get(get_rental))
        .route("/rentals/{rental_id}/approve", axum::routing::post(approve_rental))
        .route("/rentals/{rental_id}/sign", axum::routing::post(sign_rental))
        .route("/rentals/{rental_id}/cancel", axum::routing::post(cancel_rental))
        .route(
            "/rentals/{rental_id}/mark-paid",
            axum::routing::post(mark_rental_paid),
        )
}

#[derive(Debug, serde::Deserialize)]
struct RentalPath {
    rental_id: Uuid,
}

/// Resident files a rental request; the apartment is reserved as a side
/// effect, which blocks further requests against it.
async fn create_rental(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRentalInput>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&state, &headers)?;
    validate_input(&payload)?;

    let rental = rental_lifecycle::create_rental(
        &state.db_pool,
        payload.apartment_id,
        user.user_id,
        payload.months,
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(rental)))
}

/// Operators see every rental; residents only their own.
async fn list_rentals(
    State(state): State<AppState>,
    Query(query): Query<RentalsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let limit = clamp_limit_in_range(query.limit, 1, 500);
    let status_filter = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let rows: Vec<Rental> = match (user.role, status_filter) {
        (Role::Operator, Some(status)) => {
            sqlx::query_as(
                "SELECT * FROM rentals WHERE status = $1::rental_status
                 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(status)
            .bind(limit)
            .fetch_all(&state.db_pool)
            .await
            .map_err(map_bad_status(status))?
        }
        (Role::Operator, None) => {
            sqlx::query_as("SELECT * FROM rentals ORDER BY created_at DESC LIMIT $1")
                .bind(limit)
                .fetch_all(&state.db_pool)
                .await?
        }
        (Role::Resident, Some(status)) => {
            sqlx::query_as(
                "SELECT * FROM rentals
                 WHERE resident_id = $1 AND status = $2::rental_status
                 ORDER BY created_at DESC LIMIT $3",
            )
            .bind(user.user_id)
            .bind(status)
            .bind(limit)
            .fetch_all(&state.db_pool)
            .await
            .map_err(map_bad_status(status))?
        }
        (Role::Resident, None) => {
            sqlx::query_as(
                "SELECT * FROM rentals WHERE resident_id = $1
                 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(user.user_id)
            .bind(limit)
            .fetch_all(&state.db_pool)
            .await?
        }
    };

    Ok(Json(json!({ "data": rows })))
}

async fn get_rental(
    State(state): State<AppState>,
    Path(path): Path<RentalPath>,
    headers: HeaderMap,
) -> AppResult<Json<Rental>> {
    let user = require_user(&state, &headers)?;
    let rental = rental_lifecycle::get_rental(&state.db_pool, path.rental_id).await?;

    if user.role != Role::Operator && rental.resident_id != user.user_id {
        return Err(AppError::Forbidden(
            "You may only view your own rentals.".to_string(),
        ));
    }
    Ok(Json(rental))
}

async fn approve_rental(
    State(state): State<AppState>,
    Path(path): Path<RentalPath>,
    headers: HeaderMap,
) -> AppResult<Json<Rental>> {
    require_operator(&state, &headers)?;
    let rental = rental_lifecycle::approve(&state.db_pool, path.rental_id).await?;
    Ok(Json(rental))
}

async fn sign_rental(
    State(state): State<AppState>,
    Path(path): Path<RentalPath>,
    headers: HeaderMap,
) -> AppResult<Json<Rental>> {
    let user = require_user(&state, &headers)?;
    let rental = rental_lifecycle::sign(&state.db_pool, path.rental_id, user.user_id).await?;
    Ok(Json(rental))
}

/// Either party may request cancellation; only an operator may finalize a
/// pending cancellation (`finish = true`).
async fn cancel_rental(
    State(state): State<AppState>,
    Path(path): Path<RentalPath>,
    headers: HeaderMap,
    Json(payload): Json<CancelRentalInput>,
) -> AppResult<Json<Rental>> {
    let user = require_user(&state, &headers)?;

    if payload.finish && user.role != Role::Operator {
        return Err(AppError::Forbidden(
            "Only an operator may finalize a cancellation.".to_string(),
        ));
    }
    if user.role != Role::Operator {
        let rental = rental_lifecycle::get_rental(&state.db_pool, path.rental_id).await?;
        if rental.resident_id != user.user_id {
            return Err(AppError::Forbidden(
                "You may only cancel your own rentals.".to_string(),
            ));
        }
    }

    let rental = rental_lifecycle::cancel(&state.db_pool, path.rental_id, payload.finish).await?;
    Ok(Json(rental))
}

/// Manual settlement for cash payments. Same idempotent transition as the
/// gateway path; confirming twice is a safe no-op.
async fn mark_rental_paid(
    State(state): State<AppState>,
    Path(path): Path<RentalPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_operator(&state, &headers)?;

    let applied = reconciler::settle_rental(&state, path.rental_id).await?;
    let rental = rental_lifecycle::get_rental(&state.db_pool, path.rental_id).await?;

    Ok(Json(json!({ "applied": applied, "rental": rental })))
}

fn map_bad_status(status: &str) -> impl Fn(sqlx::Error) -> AppError + '_ {
    move |e| match e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22P02") => {
            AppError::BadRequest(format!("Unknown rental status filter '{status}'."))
        }
        other => AppError::from(other),
    }
}
