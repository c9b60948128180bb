//! Wolfpack - Cluster Coordination Primitives
//!
//! Leader election and service discovery for distributed worker pools,
//! built on a ZooKeeper-style coordination service (hierarchical
//! namespace, ephemeral and sequential nodes, one-shot watches).
//!
//! # Architecture
//!
//! Every peer volunteers an ephemeral-sequential candidacy node under a
//! shared election path; the lowest live sequence is the leader. Each
//! follower watches only its immediate predecessor, so a departing
//! leader wakes exactly one peer instead of the whole pack. Worker
//! addresses live in a second path of ephemeral nodes, and every
//! instance keeps an atomically swapped snapshot of the live member
//! list. Failure detection is entirely ephemeral-node lifetime plus
//! watch notifications; there are no application-level heartbeats.
//!
//! # Features
//!
//! - Leader election with O(1) watch fan-out per leadership change
//! - Role-change callbacks into the embedding application
//! - Service registry with race-tolerant snapshot rebuilds
//! - Explicit session lifecycle with a waitable terminal state
//! - In-memory coordination backend for tests and local runs
//! - Apache ZooKeeper backend (cargo feature `zookeeper`)

pub mod cluster;
pub mod config;
pub mod coordination;
pub mod error;

pub use config::WolfpackConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{
        ElectionParticipant, MembershipRegistry, ParticipantState, RoleCallback,
    };
    pub use crate::config::WolfpackConfig;
    pub use crate::coordination::{CoordinationClient, Session, SessionState};
    pub use crate::error::{Error, Result};
}
