// tests/property/main.rs

mod heartbeat;
mod queue;
mod value;
