pub mod driver;
pub mod environment;
pub mod fabric;
pub mod lifecycle;
pub mod oracle;
pub mod topology;
pub mod unit_flags;
pub mod utils;
