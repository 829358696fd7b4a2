//! Session thread placement

pub mod cpu;

pub use cpu::{
    num_cores, pin_to_core, place_session_thread, plan_session_cores, set_realtime_priority,
};
