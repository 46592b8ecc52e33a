//! Database models module
//!
//! Subscription records and their helpers live in subscription.rs,
//! recorded deliveries in document.rs, the typed pool handle in table.rs.

mod document;
mod subscription;
mod table;

pub use document::Document;
pub use subscription::{make_callback_url, Added, Mode, Subscription};
pub use table::Table;
