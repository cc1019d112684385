//! Integration tests against the public client API

pub mod http_api_test;
pub mod manager_test;
pub mod polling_test;
pub mod queue_replay_test;
