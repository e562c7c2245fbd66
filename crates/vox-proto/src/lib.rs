pub mod command;
pub mod setpoint;
pub mod telemetry;
