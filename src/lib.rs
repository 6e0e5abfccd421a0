pub mod config;
pub mod masking;
pub mod models;
pub mod storage;
pub mod visits;
