pub mod client;
pub mod packet;
pub mod records;

pub use client::{ClientError, DnsClient};
