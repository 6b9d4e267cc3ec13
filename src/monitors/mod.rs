pub mod connectivity;

pub use connectivity::{ConnectivityProbe, ProbeOutcome, SystemProbe};
