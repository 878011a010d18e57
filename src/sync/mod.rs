//! Keeping the client in step with the bot: connectivity tracking and
//! adaptive status polling.

mod connectivity;
mod scheduler;
mod timer;

pub use connectivity::{replay_on_reconnect, Connectivity, ConnectivityObserver, ConnectivityProbe};
pub use scheduler::{Intervals, PollState, SyncScheduler};
