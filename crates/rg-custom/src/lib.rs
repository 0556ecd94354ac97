pub mod store;
pub mod types;

pub use store::{CustomError, CustomRblStore};
pub use types::{CustomCheck, CustomEntry, CustomZoneConfig, CUSTOM_RESPONSE_ADDR};
