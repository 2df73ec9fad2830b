pub mod clock;
pub mod config;
pub mod controller;
pub mod hardware;
pub mod setup;
