pub mod accession;
pub mod config;
pub mod contract;
pub mod http;
pub mod listing;
pub mod lock;
pub mod scanner;
pub mod store;
pub mod transfer;
pub mod workflow;
