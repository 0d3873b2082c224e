//! Sign in with Apple integration tests against a mock Apple server.

pub mod mock_server;

mod authenticate_tests;
mod key_rotation_tests;
