use axum::{extract::State, http::HeaderMap, Json};

use crate::{
    auth::require_operator,
    error::AppResult,
    models::FeeSettings,
    schemas::{validate_input, UpdateFeeSettingsInput},
    services::invoicing,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/settings/fees",
        axum::routing::get(get_fee_settings).put(update_fee_settings),
    )
}

async fn get_fee_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<FeeSettings>> {
    require_operator(&state, &headers)?;

    let settings = invoicing::load_or_init_settings(
        &state.db_pool,
        state.config.default_common_fee,
        state.config.default_cleaning_fee,
        state.config.default_electricity_price,
    )
    .await?;
    Ok(Json(settings))
}

async fn update_fee_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateFeeSettingsInput>,
) -> AppResult<Json<FeeSettings>> {
    require_operator(&state, &headers)?;
    validate_input(&payload)?;

    let settings = invoicing::update_settings(
        &state.db_pool,
        payload.common_fee,
        payload.cleaning_fee,
        payload.electricity_price,
    )
    .await?;

    tracing::info!(
        common_fee = settings.common_fee,
        cleaning_fee = settings.cleaning_fee,
        electricity_price = settings.electricity_price,
        "Fee settings updated"
    );
    Ok(Json(settings))
}
