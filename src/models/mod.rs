mod approval;
mod audit_log;
mod benefit;
mod idempotency;
mod job;
mod order;
mod payment_event;

pub use approval::*;
pub use audit_log::*;
pub use benefit::*;
pub use idempotency::*;
pub use job::*;
pub use order::*;
pub use payment_event::*;
