//! Client façade: application identity, request building and the switch that turns
//! network call monitoring on.
mod client;
mod constants;
mod errors;
mod types;

#[doc(inline)]
pub use client::{ApigeeClient, ApigeeClientBuilder};

#[doc(inline)]
pub use constants::DEFAULT_BASE_URL;

#[doc(inline)]
pub use errors::{AppError, AppResult};

#[doc(inline)]
pub use types::{AppIdentification, ApigeeClientOptions};

pub static SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
