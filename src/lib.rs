pub mod chunking;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fsm;
pub mod metadata_service;
pub mod raft_types;
pub mod storage_node;
pub mod telemetry;
pub mod wire;
