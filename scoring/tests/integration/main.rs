// Test modules
pub mod mocks;
pub mod test_utils;

pub mod api_tests;
pub mod ml_client_tests;
pub mod rule_engine_tests;
pub mod storage_tests;
