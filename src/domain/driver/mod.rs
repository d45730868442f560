pub mod grid;
pub mod interrupt;
pub mod phase_driver;
pub mod record_writer;
pub mod stats;
