pub mod assistant;
pub mod context;
pub mod moderation;
pub mod outbound;
pub mod reminders;
pub mod summarize;

pub use assistant::{AssistantJob, ASSISTANT_JOB};
pub use context::WorkerContext;
pub use moderation::{ModerationPassJob, MODERATION_JOB};
pub use outbound::{OutboundRetryJob, OUTBOUND_RETRY_JOB};
pub use reminders::{ReminderDispatchJob, REMINDER_DISPATCH_JOB};
pub use summarize::{SummarizeJob, SUMMARIZE_JOB};
