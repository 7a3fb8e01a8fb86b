pub mod bundle;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fs_util;
pub mod http;
pub mod manifest;
pub mod ops;
pub mod output;
pub mod pipeline;
pub mod script;
pub mod sources;
pub mod tool;
