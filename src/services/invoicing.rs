use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{FeeSettings, Invoice};

/// One editable line of a billing batch, pre-filled from settings and the
/// rental's meter history, then adjusted by the operator before creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftLine {
    pub rental_id: Uuid,
    pub resident_id: Uuid,
    pub apartment_id: Uuid,
    pub common_fee: i64,
    pub cleaning_fee: i64,
    pub electric_old_index: i64,
    /// Filled in by the operator from the meter reading.
    pub electric_new_index: Option<i64>,
    pub electric_price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub electric_usage: i64,
    pub electric_total: i64,
    pub total_amount: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchReport {
    pub created: u32,
    pub skipped: u32,
}

/// Usage and totals for one draft line. Rejects a missing or regressed
/// meter index; a cumulative meter cannot run backwards.
pub fn compute_totals(
    old_index: i64,
    new_index: Option<i64>,
    electric_price: i64,
    common_fee: i64,
    cleaning_fee: i64,
) -> AppResult<InvoiceTotals> {
    let new_index = new_index.ok_or_else(|| {
        AppError::Validation("A new electricity meter index is required.".to_string())
    })?;
    if new_index < old_index {
        return Err(AppError::Validation(format!(
            "New meter index {new_index} is below the previous index {old_index}."
        )));
    }
    if electric_price < 0 || common_fee < 0 || cleaning_fee < 0 {
        return Err(AppError::Validation(
            "Fees and unit price cannot be negative.".to_string(),
        ));
    }

    let electric_usage = new_index - old_index;
    let electric_total = electric_usage * electric_price;
    Ok(InvoiceTotals {
        electric_usage,
        electric_total,
        total_amount: common_fee + cleaning_fee + electric_total,
    })
}

/// Latest billed meter index for a rental; 0 before the first invoice.
/// Consecutive invoices chain on this value, so no separate meter-reading
/// ledger exists.
pub async fn last_billed_index(pool: &PgPool, rental_id: Uuid) -> AppResult<i64> {
    let last: Option<i64> = sqlx::query_scalar(
        "SELECT electric_new_index FROM invoices
         WHERE rental_id = $1
         ORDER BY created_at DESC
         LIMIT 1",
    )
    .bind(rental_id)
    .fetch_optional(pool)
    .await?;
    Ok(last.unwrap_or(0))
}

/// One draft line per rental currently in `rented` status, with the old
/// index pre-filled from meter history and fee defaults copied from the
/// settings snapshot passed by the caller.
pub async fn prepare_drafts(pool: &PgPool, settings: &FeeSettings) -> AppResult<Vec<DraftLine>> {
    let rentals: Vec<(Uuid, Uuid, Uuid)> = sqlx::query_as(
        "SELECT id, resident_id, apartment_id FROM rentals
         WHERE status = 'rented'
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut drafts = Vec::with_capacity(rentals.len());
    for (rental_id, resident_id, apartment_id) in rentals {
        drafts.push(DraftLine {
            rental_id,
            resident_id,
            apartment_id,
            common_fee: settings.common_fee,
            cleaning_fee: settings.cleaning_fee,
            electric_old_index: last_billed_index(pool, rental_id).await?,
            electric_new_index: None,
            electric_price: settings.electricity_price,
        });
    }
    Ok(drafts)
}

/// Create one unpaid invoice from a draft line.
///
/// The old index is re-derived from the stored chain at creation time (an
/// edited draft cannot fork the meter history), and the unit price is
/// frozen into the row. The `(rental_id, month, year)` unique index turns
/// a duplicate period into a `Conflict`.
pub async fn create_invoice(
    pool: &PgPool,
    line: &DraftLine,
    month: i32,
    year: i32,
) -> AppResult<Invoice> {
    if !(1..=12).contains(&month) {
        return Err(AppError::Validation(format!("Invalid billing month {month}.")));
    }

    let old_index = last_billed_index(pool, line.rental_id).await?;
    let totals = compute_totals(
        old_index,
        line.electric_new_index,
        line.electric_price,
        line.common_fee,
        line.cleaning_fee,
    )?;

    let invoice = sqlx::query_as::<_, Invoice>(
        "INSERT INTO invoices (
             rental_id, resident_id, apartment_id, month, year,
             common_fee, cleaning_fee,
             electric_old_index, electric_new_index, electric_usage,
             electric_price, electric_total, total_amount, status
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'unpaid')
         RETURNING *",
    )
    .bind(line.rental_id)
    .bind(line.resident_id)
    .bind(line.apartment_id)
    .bind(month)
    .bind(year)
    .bind(line.common_fee)
    .bind(line.cleaning_fee)
    .bind(old_index)
    .bind(line.electric_new_index)
    .bind(totals.electric_usage)
    .bind(line.electric_price)
    .bind(totals.electric_total)
    .bind(totals.total_amount)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(format!(
            "Rental {} already has an invoice for {month}/{year}.",
            line.rental_id
        )),
        other => AppError::from(other),
    })?;

    Ok(invoice)
}

/// Create invoices for a whole batch of edited draft lines.
///
/// Skip-invalid-continue: a line with a bad meter index (or a duplicate
/// period) is logged and skipped, never fatal to the rest of the batch.
/// The report carries the count actually created.
pub async fn create_invoice_batch(
    pool: &PgPool,
    lines: &[DraftLine],
    month: i32,
    year: i32,
) -> BatchReport {
    let mut report = BatchReport::default();

    for line in lines {
        match create_invoice(pool, line, month, year).await {
            Ok(invoice) => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    rental_id = %line.rental_id,
                    total_amount = invoice.total_amount,
                    "Invoice created"
                );
                report.created += 1;
            }
            Err(AppError::Validation(reason)) | Err(AppError::Conflict(reason)) => {
                tracing::warn!(rental_id = %line.rental_id, %reason, "Skipping invoice line");
                report.skipped += 1;
            }
            Err(other) => {
                tracing::error!(rental_id = %line.rental_id, error = %other, "Invoice line failed");
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        created = report.created,
        skipped = report.skipped,
        month,
        year,
        "Invoice batch completed"
    );
    report
}

/// Fetch the singleton fee schedule, seeding defaults on first run.
/// Callers receive it as a value; nothing reads it implicitly mid-batch.
pub async fn load_or_init_settings(
    pool: &PgPool,
    default_common: i64,
    default_cleaning: i64,
    default_electricity: i64,
) -> AppResult<FeeSettings> {
    let settings = sqlx::query_as::<_, FeeSettings>(
        "INSERT INTO fee_settings (id, common_fee, cleaning_fee, electricity_price)
         VALUES (1, $1, $2, $3)
         ON CONFLICT (id) DO UPDATE SET id = fee_settings.id
         RETURNING *",
    )
    .bind(default_common)
    .bind(default_cleaning)
    .bind(default_electricity)
    .fetch_one(pool)
    .await?;
    Ok(settings)
}

pub async fn update_settings(
    pool: &PgPool,
    common_fee: i64,
    cleaning_fee: i64,
    electricity_price: i64,
) -> AppResult<FeeSettings> {
    if common_fee < 0 || cleaning_fee < 0 || electricity_price < 0 {
        return Err(AppError::Validation(
            "Fee values cannot be negative.".to_string(),
        ));
    }
    let settings = sqlx::query_as::<_, FeeSettings>(
        "UPDATE fee_settings
         SET common_fee = $1, cleaning_fee = $2, electricity_price = $3, updated_at = now()
         WHERE id = 1
         RETURNING *",
    )
    .bind(common_fee)
    .bind(cleaning_fee)
    .bind(electricity_price)
    .fetch_one(pool)
    .await?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_metered_totals() {
        // 120 → 150 @ 3,800 plus 300,000 common and 100,000 cleaning.
        let totals = compute_totals(120, Some(150), 3_800, 300_000, 100_000).unwrap();
        assert_eq!(totals.electric_usage, 30);
        assert_eq!(totals.electric_total, 114_000);
        assert_eq!(totals.total_amount, 514_000);
    }

    #[test]
    fn first_invoice_starts_from_zero_index() {
        let totals = compute_totals(0, Some(85), 3_800, 300_000, 100_000).unwrap();
        assert_eq!(totals.electric_usage, 85);
        assert_eq!(totals.total_amount, 300_000 + 100_000 + 85 * 3_800);
    }

    #[test]
    fn zero_usage_is_allowed() {
        let totals = compute_totals(150, Some(150), 3_800, 300_000, 100_000).unwrap();
        assert_eq!(totals.electric_usage, 0);
        assert_eq!(totals.total_amount, 400_000);
    }

    #[test]
    fn rejects_missing_new_index() {
        let err = compute_totals(120, None, 3_800, 300_000, 100_000).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_regressed_meter() {
        let err = compute_totals(150, Some(120), 3_800, 300_000, 100_000).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_negative_fees() {
        assert!(compute_totals(0, Some(10), -1, 0, 0).is_err());
        assert!(compute_totals(0, Some(10), 0, -1, 0).is_err());
    }
}
