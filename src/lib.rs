// src/lib.rs

pub mod app_state;
pub mod catalog;
pub mod config;
pub mod metadata;
pub mod service;
pub mod storage;
pub mod tls;
