use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::require_operator,
    error::{AppError, AppResult},
    models::Apartment,
    schemas::{clamp_limit_in_range, validate_input, ApartmentsQuery, CreateApartmentInput},
    services::rental_lifecycle,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/apartments",
            axum::routing::get(list_apartments).post(create_apartment),
        )
        .route("/apartments/{apartment_id}", axum::routing::get(get_apartment))
}

#[derive(Debug, serde::Deserialize)]
struct ApartmentPath {
    apartment_id: Uuid,
}

async fn list_apartments(
    State(state): State<AppState>,
    Query(query): Query<ApartmentsQuery>,
) -> AppResult<Json<Value>> {
    let limit = clamp_limit_in_range(query.limit, 1, 500);

    let rows: Vec<Apartment> = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty())
    {
        Some(status) => {
            sqlx::query_as(
                "SELECT * FROM apartments WHERE status = $1::apartment_status
                 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(status)
            .bind(limit)
            .fetch_all(&state.db_pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("22P02") => {
                    AppError::BadRequest(format!("Unknown apartment status filter '{status}'."))
                }
                other => AppError::from(other),
            })?
        }
        None => {
            sqlx::query_as("SELECT * FROM apartments ORDER BY created_at DESC LIMIT $1")
                .bind(limit)
                .fetch_all(&state.db_pool)
                .await?
        }
    };

    Ok(Json(json!({ "data": rows })))
}

async fn get_apartment(
    State(state): State<AppState>,
    Path(path): Path<ApartmentPath>,
) -> AppResult<Json<Apartment>> {
    let apartment = rental_lifecycle::get_apartment(&state.db_pool, path.apartment_id).await?;
    Ok(Json(apartment))
}

async fn create_apartment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateApartmentInput>,
) -> AppResult<impl IntoResponse> {
    require_operator(&state, &headers)?;
    validate_input(&payload)?;

    let apartment: Apartment = sqlx::query_as(
        "INSERT INTO apartments (title, price, status)
         VALUES ($1, $2, 'available')
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(payload.price)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(apartment)))
}
