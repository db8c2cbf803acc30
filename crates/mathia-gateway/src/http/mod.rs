pub mod auth_api;
pub mod health;
pub mod quota;
pub mod rooms;
pub mod uploads;
pub mod webhooks;
