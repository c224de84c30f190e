pub mod comparison;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod report;
pub mod source;
pub mod transport;
pub mod version;
