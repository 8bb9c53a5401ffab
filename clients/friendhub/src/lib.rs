pub mod cli;
pub mod config;
pub mod console;
pub mod realtime;
pub mod replay;
pub mod rest;
pub mod session_cache;
