//! Chat platform transports that feed raw notifications into the ingestor.

pub mod green_api;
