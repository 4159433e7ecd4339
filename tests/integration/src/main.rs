mod helpers;

mod counters;
mod expiry_eviction;
mod set;
mod watch;
