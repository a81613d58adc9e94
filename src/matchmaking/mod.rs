//! Duel pairing: scoring, candidate selection and the scheduler task that
//! drives them.

pub mod engine;
pub mod gateway;
pub mod scheduler;
pub mod scorer;
pub mod selector;

pub use engine::{DuelAttribution, Matchmaker, QueueSnapshot, ReadyOutcome};
pub use gateway::ChatGateway;
pub use scheduler::{spawn, MatchmakingHandle};
