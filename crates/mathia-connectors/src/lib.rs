pub mod connector;
pub mod connectors;
pub mod dispatch;
pub mod result;
pub mod router;

pub use connector::{CallCtx, Connector, ConnectorError, Payload};
pub use connectors::{
    CalendarConnector, InfoConnector, ItineraryConnector, MessagingConnector,
    ModerationConnector, ReminderConnector, TravelConnector, WalletConnector,
};
pub use dispatch::Dispatcher;
pub use result::{ConnectorResult, ResultMetadata, ResultStatus};
pub use router::McpRouter;
