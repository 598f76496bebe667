use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::services::invoicing::DraftLine;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::Validation(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: Option<i64>, min: i64, max: i64) -> i64 {
    limit.unwrap_or(max).clamp(min, max)
}

fn default_false() -> bool {
    false
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApartmentInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(range(min = 1))]
    pub price: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApartmentsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRentalInput {
    pub apartment_id: Uuid,
    #[validate(range(min = 1, max = 120))]
    pub months: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RentalsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelRentalInput {
    #[serde(default = "default_false")]
    pub finish: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DraftPeriodQuery {
    #[validate(range(min = 1, max = 12))]
    pub month: i32,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInvoiceBatchInput {
    #[validate(range(min = 1, max = 12))]
    pub month: i32,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    pub lines: Vec<DraftLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicesQuery {
    pub rental_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateFeeSettingsInput {
    #[validate(range(min = 0))]
    pub common_fee: i64,
    #[validate(range(min = 0))]
    pub cleaning_fee: i64,
    #[validate(range(min = 0))]
    pub electricity_price: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentUrlResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::clamp_limit_in_range;

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(None, 1, 500), 500);
        assert_eq!(clamp_limit_in_range(Some(0), 1, 500), 1);
        assert_eq!(clamp_limit_in_range(Some(9999), 1, 500), 500);
        assert_eq!(clamp_limit_in_range(Some(50), 1, 500), 50);
    }
}
