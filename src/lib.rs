pub mod client;
pub mod config;
pub mod error;
pub mod interactor;
pub mod pacing;
pub mod parser;
pub mod player;
pub mod shop;
