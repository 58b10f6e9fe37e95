pub mod client;
pub mod lifecycle;
pub mod paths;
pub mod service;
pub mod wire;
