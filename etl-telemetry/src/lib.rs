//! Telemetry setup shared by binaries and tests built on the ETL runtime.

pub mod tracing;
