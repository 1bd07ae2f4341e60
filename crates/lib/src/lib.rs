//! Warelay core library: webhook normalization, concurrency guard, dispatch and reply delivery
//! for WhatsApp gateway providers, used by the `warelay` CLI.

pub mod ai;
pub mod channels;
pub mod command;
pub mod compose;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod gateway;
pub mod guard;
pub mod init;
pub mod reply;
pub mod services;
