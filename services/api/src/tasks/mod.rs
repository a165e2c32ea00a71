pub mod sweeper;

pub use sweeper::{spawn_sweeper, sweep_once, SweepStats};
