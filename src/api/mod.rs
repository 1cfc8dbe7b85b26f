pub mod client;
pub mod envelope;
pub mod resources;
pub mod types;

pub use client::{ApiClient, RequestDescriptor};
pub use envelope::{decode_records, extract_array, extract_one};
pub use resources::{AdminRecord, Resource};
