//! Top-level error type for constructor- and wiring-time failures.
//!
//! Runtime protocol errors (bad checksum, bad FCS, no route, TTL exhausted,
//! max retransmissions, queue overflow on an established queue) are handled
//! in place — logged and/or answered with an ICMP packet — and never
//! surface as a `SimError`. This type only covers failures that must be
//! reported to the caller constructing or wiring up a simulation.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid argument: {0}")]
    ArgumentValidation(String),

    #[error("queue is full")]
    QueueFull,

    #[error("connector is already attached to a cable")]
    ConnectorAlreadyAttached,

    #[error("position {0} m is already occupied on this cable")]
    DuplicatePosition(f64),

    #[error("position {0} m is not a multiple of the {1} m installation grid")]
    InvalidGridPosition(f64, f64),

    #[error("no such interface: {0}")]
    NoSuchInterface(String),
}

pub type SimResult<T> = Result<T, SimError>;
