pub mod app;
pub mod hook;
pub mod peer;
pub mod relay;
pub mod transport;
