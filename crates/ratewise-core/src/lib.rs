//! Shared domain model for ratewise: rate sheets, routes, pricing tiers,
//! surcharges, query criteria, configuration, and the error taxonomy.

pub mod config;
pub mod container;
pub mod error;
pub mod location;
pub mod types;
pub mod validation;

pub use config::RatewiseConfig;
pub use container::ContainerType;
pub use error::{RatewiseError, Result};
pub use location::LocationNormalizer;
pub use types::*;
