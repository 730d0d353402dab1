pub mod cache;
pub mod email;
pub mod invoicing;
pub mod payments;
pub mod schedule;
