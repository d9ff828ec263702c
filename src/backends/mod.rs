// Backend trait definitions and core types

pub mod capture;
pub mod process;

/// Backend priority ranking (higher = better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendPriority {
    Good = 2,     // Solid implementation (pnet raw sockets)
    Best = 4,     // Optimal (native /proc parsing)
}
