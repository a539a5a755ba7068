//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Values error - values files or --set overrides are invalid
pub const VALUES_ERROR: i32 = 2;

/// Drift detected - `diff --exit-code` found changes
pub const DRIFT_DETECTED: i32 = 3;

/// Chart error - chart could not be fetched or loaded
pub const CHART_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Cluster error - cluster session or registry client could not be set up
pub const CLUSTER_ERROR: i32 = 6;

/// Release not found
pub const NOT_FOUND: i32 = 7;
