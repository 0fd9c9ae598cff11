pub mod api;
pub mod app;
pub mod config;
pub mod encoder;
pub mod humanize;
pub mod ledger;
pub mod observability;
pub mod proto;
pub mod queue;
pub mod storage;
pub mod worker;
