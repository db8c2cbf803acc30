//! Concrete connector adapters. Each module owns one upstream concern and
//! registers a handful of actions; wire formats live entirely inside the
//! adapter.

pub mod calendar;
pub mod info;
pub mod itinerary;
pub mod messaging;
pub mod moderation;
pub mod reminders;
pub mod travel;
pub mod wallet;

pub use calendar::CalendarConnector;
pub use info::InfoConnector;
pub use itinerary::ItineraryConnector;
pub use messaging::MessagingConnector;
pub use moderation::ModerationConnector;
pub use reminders::ReminderConnector;
pub use travel::TravelConnector;
pub use wallet::WalletConnector;
