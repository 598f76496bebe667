use chrono::{Months, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Apartment, Rental, RentalStatus};

/// Flat contract price, frozen at creation. Invoices are billed separately.
pub fn total_price_for(monthly_price: i64, months: i32) -> i64 {
    monthly_price * i64::from(months)
}

/// Contract period starting on the signing day.
pub fn contract_period(signed_on: NaiveDate, months: i32) -> (NaiveDate, NaiveDate) {
    let end = signed_on
        .checked_add_months(Months::new(months.max(0) as u32))
        .unwrap_or(signed_on);
    (signed_on, end)
}

pub async fn get_rental(pool: &PgPool, rental_id: Uuid) -> AppResult<Rental> {
    sqlx::query_as::<_, Rental>("SELECT * FROM rentals WHERE id = $1")
        .bind(rental_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Rental {rental_id} not found.")))
}

pub async fn get_apartment(pool: &PgPool, apartment_id: Uuid) -> AppResult<Apartment> {
    sqlx::query_as::<_, Apartment>("SELECT * FROM apartments WHERE id = $1")
        .bind(apartment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Apartment {apartment_id} not found.")))
}

/// Create a rental request in `pending` and reserve the apartment.
///
/// The reservation is a conditional update (available → reserved): a second
/// concurrent request against the same apartment loses the condition and
/// gets a `Conflict`, which also enforces the one-active-rental-per-
/// apartment rule without a separate uniqueness check.
pub async fn create_rental(
    pool: &PgPool,
    apartment_id: Uuid,
    resident_id: Uuid,
    months: i32,
) -> AppResult<Rental> {
    if months <= 0 {
        return Err(AppError::Validation(
            "Rental duration must be at least one month.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let apartment =
        sqlx::query_as::<_, Apartment>("SELECT * FROM apartments WHERE id = $1")
            .bind(apartment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Apartment {apartment_id} not found.")))?;

    let reserved = sqlx::query(
        "UPDATE apartments SET status = 'reserved' WHERE id = $1 AND status = 'available'",
    )
    .bind(apartment_id)
    .execute(&mut *tx)
    .await?;

    if reserved.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "Apartment {apartment_id} is not available for rent."
        )));
    }

    let rental = sqlx::query_as::<_, Rental>(
        "INSERT INTO rentals (apartment_id, resident_id, months, total_price, status)
         VALUES ($1, $2, $3, $4, 'pending')
         RETURNING *",
    )
    .bind(apartment_id)
    .bind(resident_id)
    .bind(months)
    .bind(total_price_for(apartment.price, months))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        rental_id = %rental.id,
        apartment_id = %apartment_id,
        resident_id = %resident_id,
        months,
        total_price = rental.total_price,
        "Rental request created, apartment reserved"
    );
    Ok(rental)
}

/// Operator approval: pending → approved, apartment reserved → rented.
/// Approving an already-approved rental is a no-op.
pub async fn approve(pool: &PgPool, rental_id: Uuid) -> AppResult<Rental> {
    let mut tx = pool.begin().await?;

    let rental = fetch_rental_tx(&mut tx, rental_id).await?;

    let moved = sqlx::query(
        "UPDATE rentals SET status = 'approved', updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(rental_id)
    .execute(&mut *tx)
    .await?;

    if moved.rows_affected() == 0 {
        // The snapshot read before the update can be stale under a
        // concurrent commit; classify from a fresh row.
        let current = fetch_rental_tx(&mut tx, rental_id).await?;
        ensure_already_approved(&current)?;
        tracing::info!(rental_id = %rental_id, "Approve was already applied");
        tx.rollback().await?;
        return Ok(current);
    }

    sqlx::query("UPDATE apartments SET status = 'rented' WHERE id = $1 AND status = 'reserved'")
        .bind(rental.apartment_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(rental_id = %rental_id, "Rental approved, apartment marked rented");
    get_rental(pool, rental_id).await
}

/// Resident signs the contract: sets `contract_signed` and the contract
/// period together. Only the owning resident may sign, and only from
/// `approved`.
pub async fn sign(pool: &PgPool, rental_id: Uuid, resident_id: Uuid) -> AppResult<Rental> {
    let rental = get_rental(pool, rental_id).await?;

    if rental.resident_id != resident_id {
        return Err(AppError::Forbidden(
            "Only the requesting resident may sign this contract.".to_string(),
        ));
    }
    if rental.status != RentalStatus::Approved {
        return Err(AppError::InvalidState(format!(
            "Contract can only be signed while approved (current: {:?}).",
            rental.status
        )));
    }
    if rental.contract_signed {
        tracing::info!(rental_id = %rental_id, "Contract already signed");
        return Ok(rental);
    }

    let (start, end) = contract_period(Utc::now().date_naive(), rental.months);

    let updated = sqlx::query(
        "UPDATE rentals
         SET contract_signed = true, start_date = $2, end_date = $3, updated_at = now()
         WHERE id = $1 AND status = 'approved' AND contract_signed = false",
    )
    .bind(rental_id)
    .bind(start)
    .bind(end)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        tracing::info!(rental_id = %rental_id, "Sign lost the race, treating as applied");
    } else {
        tracing::info!(rental_id = %rental_id, %start, %end, "Contract signed");
    }
    get_rental(pool, rental_id).await
}

/// Confirm the contract payment: approved+signed → rented with
/// `payment_done`, apartment forced to rented.
///
/// Returns whether the transition was applied now; `false` means a
/// duplicate confirmation (gateway retry or concurrent manual settlement)
/// found it already done, a safe no-op, and the caller must not re-send
/// notifications for it.
pub async fn confirm_payment(pool: &PgPool, rental_id: Uuid) -> AppResult<bool> {
    let mut tx = pool.begin().await?;

    let rental = fetch_rental_tx(&mut tx, rental_id).await?;

    let applied = sqlx::query(
        "UPDATE rentals
         SET payment_done = true, status = 'rented', updated_at = now()
         WHERE id = $1 AND contract_signed = true AND payment_done = false
           AND status IN ('approved', 'rented')",
    )
    .bind(rental_id)
    .execute(&mut *tx)
    .await?;

    if applied.rows_affected() == 0 {
        // A concurrent duplicate callback may have committed between the
        // read above and the update; classify from a fresh row.
        let current = fetch_rental_tx(&mut tx, rental_id).await?;
        ensure_already_paid(&current)?;
        tracing::info!(rental_id = %rental_id, "Payment already confirmed, no-op");
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("UPDATE apartments SET status = 'rented' WHERE id = $1")
        .bind(rental.apartment_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(rental_id = %rental_id, "Contract payment confirmed, rental is active");
    Ok(true)
}

/// Cancellation is two-phase for active rentals so the operator can settle
/// refunds out of band: approved/rented → cancelling, then a `finish` call
/// → cancelled (apartment freed). A rental still `pending` cancels
/// directly; the apartment is freed only from `reserved`, never out from
/// under another resident's active lease. Repeat calls are benign.
pub async fn cancel(pool: &PgPool, rental_id: Uuid, finish: bool) -> AppResult<Rental> {
    let mut tx = pool.begin().await?;

    let rental = fetch_rental_tx(&mut tx, rental_id).await?;

    match rental.status {
        RentalStatus::Cancelling if finish => {
            let moved = sqlx::query(
                "UPDATE rentals SET status = 'cancelled', updated_at = now()
                 WHERE id = $1 AND status = 'cancelling'",
            )
            .bind(rental_id)
            .execute(&mut *tx)
            .await?;
            if moved.rows_affected() > 0 {
                release_apartment(&mut tx, rental.apartment_id, true).await?;
                tracing::info!(rental_id = %rental_id, "Cancellation finalized, apartment released");
            }
        }
        RentalStatus::Cancelling => {
            tracing::info!(rental_id = %rental_id, "Rental already pending cancellation");
        }
        RentalStatus::Approved | RentalStatus::Rented => {
            let moved = sqlx::query(
                "UPDATE rentals SET status = 'cancelling', updated_at = now()
                 WHERE id = $1 AND status IN ('approved', 'rented')",
            )
            .bind(rental_id)
            .execute(&mut *tx)
            .await?;
            if moved.rows_affected() > 0 {
                tracing::info!(rental_id = %rental_id, "Cancellation requested, awaiting operator settlement");
            }
        }
        RentalStatus::Pending => {
            let moved = sqlx::query(
                "UPDATE rentals SET status = 'cancelled', updated_at = now()
                 WHERE id = $1 AND status = 'pending'",
            )
            .bind(rental_id)
            .execute(&mut *tx)
            .await?;
            if moved.rows_affected() > 0 {
                release_apartment(&mut tx, rental.apartment_id, false).await?;
                tracing::info!(rental_id = %rental_id, "Pending rental cancelled directly");
            }
        }
        RentalStatus::Cancelled => {
            tracing::info!(rental_id = %rental_id, "Rental already cancelled");
        }
    }

    tx.commit().await?;
    get_rental(pool, rental_id).await
}

/// An approve update that matched no row is benign only when the rental is
/// already past `pending`.
fn ensure_already_approved(current: &Rental) -> AppResult<()> {
    match current.status {
        RentalStatus::Approved | RentalStatus::Rented => Ok(()),
        other => Err(AppError::InvalidState(format!(
            "Cannot approve a rental in status {other:?}."
        ))),
    }
}

/// A payment update that matched no row is benign only when the rental is
/// already paid.
fn ensure_already_paid(current: &Rental) -> AppResult<()> {
    if current.payment_done {
        return Ok(());
    }
    if !current.contract_signed {
        return Err(AppError::InvalidState(
            "Payment cannot be confirmed before the contract is signed.".to_string(),
        ));
    }
    Err(AppError::InvalidState(format!(
        "Payment cannot be confirmed from status {:?}.",
        current.status
    )))
}

async fn fetch_rental_tx(
    tx: &mut Transaction<'_, Postgres>,
    rental_id: Uuid,
) -> AppResult<Rental> {
    sqlx::query_as::<_, Rental>("SELECT * FROM rentals WHERE id = $1")
        .bind(rental_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Rental {rental_id} not found.")))
}

/// Free the apartment after a cancellation. For a finalized cancellation
/// the rental held the apartment in `reserved` or `rented`; for a direct
/// pending-cancel only a `reserved` hold may be released.
async fn release_apartment(
    tx: &mut Transaction<'_, Postgres>,
    apartment_id: Uuid,
    include_rented: bool,
) -> AppResult<()> {
    let query = if include_rented {
        "UPDATE apartments SET status = 'available'
         WHERE id = $1 AND status IN ('reserved', 'rented')"
    } else {
        "UPDATE apartments SET status = 'available'
         WHERE id = $1 AND status = 'reserved'"
    };
    let released = sqlx::query(query).bind(apartment_id).execute(&mut **tx).await?;
    if released.rows_affected() == 0 {
        tracing::warn!(
            apartment_id = %apartment_id,
            "Apartment not released on cancel; status had already moved"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_price_is_flat_price_times_months() {
        assert_eq!(total_price_for(5_000_000, 3), 15_000_000);
        assert_eq!(total_price_for(5_000_000, 0), 0);
    }

    #[test]
    fn contract_period_spans_requested_months() {
        let signed = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (start, end) = contract_period(signed, 3);
        assert_eq!(start, signed);
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 4, 15).unwrap());
    }

    #[test]
    fn contract_period_clamps_month_end() {
        let signed = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let (_, end) = contract_period(signed, 1);
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    fn rental_in(status: RentalStatus, contract_signed: bool, payment_done: bool) -> Rental {
        let now = Utc::now();
        Rental {
            id: Uuid::new_v4(),
            apartment_id: Uuid::new_v4(),
            resident_id: Uuid::new_v4(),
            months: 3,
            start_date: None,
            end_date: None,
            total_price: 15_000_000,
            status,
            contract_signed,
            payment_done,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn losing_a_concurrent_payment_is_a_noop() {
        // Duplicate callbacks race: the loser re-reads and finds the row
        // already paid, which must not surface as an error.
        let current = rental_in(RentalStatus::Rented, true, true);
        assert!(ensure_already_paid(&current).is_ok());
    }

    #[test]
    fn unsigned_payment_is_a_state_error() {
        let current = rental_in(RentalStatus::Approved, false, false);
        let err = ensure_already_paid(&current).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn cancelled_payment_is_a_state_error() {
        let current = rental_in(RentalStatus::Cancelled, true, false);
        assert!(ensure_already_paid(&current).is_err());
    }

    #[test]
    fn losing_a_concurrent_approve_is_a_noop() {
        for status in [RentalStatus::Approved, RentalStatus::Rented] {
            assert!(ensure_already_approved(&rental_in(status, false, false)).is_ok());
        }
    }

    #[test]
    fn approve_from_cancelled_is_a_state_error() {
        let err = ensure_already_approved(&rental_in(RentalStatus::Cancelled, false, false))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
