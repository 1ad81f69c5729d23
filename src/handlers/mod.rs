pub mod checkout;
pub mod health;
pub mod marketplace;
pub mod tickets;
pub mod webhooks;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
