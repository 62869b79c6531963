//! Orders module - dashboard-side order snapshots and refetch bookkeeping.

mod book;
mod field_policy;
mod record;
mod view_filter;

pub use book::{OrderBook, RefetchOutcome, RefetchTicket};
pub use field_policy::{OrderFieldPolicy, UpdatePlan};
pub use record::{OrderRecord, CREATED_AT_COLUMN, ID_COLUMN, STATUS_COLUMN};
pub use view_filter::ViewFilter;
