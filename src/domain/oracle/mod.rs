pub mod tables;
pub mod verifier;
