pub mod client;
pub mod feed;
pub mod memory;
mod record;
pub mod store;
