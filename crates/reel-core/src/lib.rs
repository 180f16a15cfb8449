#![doc = include_str!("../README.md")]

pub mod codec_traits;
pub mod config;
pub mod error;
pub mod filter;
pub mod queue;
pub mod types;
