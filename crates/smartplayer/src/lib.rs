pub mod catalog;
pub mod cli;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod observer;
pub mod runtime;
pub mod session;
pub mod volume;

mod dispatch;
mod player;
mod recorder;
mod ticker;
