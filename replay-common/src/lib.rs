pub mod document;
pub mod metrics;
pub mod record;
