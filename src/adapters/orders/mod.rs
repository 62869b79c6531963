//! Order fetcher adapters.

mod in_memory;
mod postgrest;

pub use in_memory::InMemoryOrderFetcher;
pub use postgrest::{order_list_query, single_order_query, PostgrestOrderFetcher, PostgrestSettings};
