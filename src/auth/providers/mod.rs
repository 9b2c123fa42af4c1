//! Concrete identity providers.

pub mod microsoft;

pub use microsoft::MicrosoftAuth;
