//! SeaORM entities for the ticket inventory and settlement core.

pub mod listing;
pub mod payment;
pub mod promotion;
pub mod purchase;
pub mod ticket;
pub mod ticket_type;
pub mod transfer_record;

pub use listing::Entity as Listing;
pub use payment::Entity as Payment;
pub use promotion::Entity as Promotion;
pub use purchase::Entity as Purchase;
pub use ticket::Entity as Ticket;
pub use ticket_type::Entity as TicketType;
pub use transfer_record::Entity as TransferRecord;
