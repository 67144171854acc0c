mod free;
mod paid;

pub use free::FreeAdapter;
pub use paid::{PaidAdapter, PaidAdapterConfig};
