//! Fallback tunnel
//!
//! When the direct route to the nodes is blocked, the daemon reaches them
//! through a reverse tunnel that forwards one loopback UDP port per node
//! slot. The tunnel is started once and restarted forever.

mod chisel;
mod supervisor;

pub use chisel::ChiselClient;
pub use supervisor::{
    Sleeper, SupervisedLoop, SupervisorPhase, TokioSleeper, TunnelClient, TunnelSupervisor,
    RESTART_DELAY,
};
