//! # cibench-dev
//!
//! Development and testing utilities for cibench.
//!
//! This crate provides:
//! - In-memory mocks of every collaborator trait, with call counters
//! - Scenario fixtures
//! - Test logging setup

pub mod mock_adapters;
pub mod utils;

// Re-export commonly used types
pub use mock_adapters::{
    chat_completion_json, MockCompletionApi, MockDiscovery, MockGateway, MockProbe, MockReply,
    ProbeReply,
};
pub use utils::{k8s_scenario, local_scenario, setup_test_logging};
