pub mod credentials;
pub mod idempotency;
pub mod inventory;
pub mod marketplace;
pub mod payments;
pub mod promotions;
pub mod settlement;
