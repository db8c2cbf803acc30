pub mod db;
pub mod error;
mod credentials;
mod keys;
mod messages;
mod pins;
mod reminders;
mod rooms;
mod store;
mod usage;
mod users;
mod wallets;
pub mod types;

pub use error::{Result, StoreError};
pub use messages::NewMessage;
pub use store::Store;
pub use types::*;
