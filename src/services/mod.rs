pub mod gateway;
pub mod invoicing;
pub mod notifications;
pub mod reconciler;
pub mod rental_lifecycle;
