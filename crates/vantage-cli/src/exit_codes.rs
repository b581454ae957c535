//! Exit codes for the `vantage` binary.

pub const SUCCESS: i32 = 0;
pub const COMMAND_FAILED: i32 = 1; // Bad input or configuration
pub const INTERNAL_ERROR: i32 = 2;
pub const OFFLINE: i32 = 3; // Request answered with the synthetic offline response

// Errors surfaced from vantage-core map through `DeliveryError::exit_code`:
// config 1, network or timeout 5, storage or invalid response 6.
