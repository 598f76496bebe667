use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "apartment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApartmentStatus {
    Available,
    Reserved,
    Rented,
    Sold,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Apartment {
    pub id: Uuid,
    pub title: String,
    pub status: ApartmentStatus,
    /// Monthly rent in integer currency units.
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rental_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    Pending,
    Approved,
    Rented,
    Cancelling,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Rental {
    pub id: Uuid,
    pub apartment_id: Uuid,
    pub resident_id: Uuid,
    pub months: i32,
    /// Null until the contract is signed.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Flat `price × months`, frozen at creation. Invoices are billed
    /// separately and never folded into this figure.
    pub total_price: i64,
    pub status: RentalStatus,
    pub contract_signed: bool,
    pub payment_done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub rental_id: Uuid,
    pub resident_id: Uuid,
    pub apartment_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub common_fee: i64,
    pub cleaning_fee: i64,
    pub electric_old_index: i64,
    pub electric_new_index: i64,
    pub electric_usage: i64,
    /// Unit price frozen at creation time, not looked up later.
    pub electric_price: i64,
    pub electric_total: i64,
    pub total_amount: i64,
    pub status: InvoiceStatus,
    pub payment_date: Option<DateTime<Utc>>,
    pub seen_by_operator: bool,
    pub created_at: DateTime<Utc>,
}

/// Singleton fee schedule (`id = 1`), seeded at startup and passed
/// explicitly into each billing batch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeeSettings {
    pub id: i16,
    pub common_fee: i64,
    pub cleaning_fee: i64,
    pub electricity_price: i64,
    pub updated_at: DateTime<Utc>,
}
