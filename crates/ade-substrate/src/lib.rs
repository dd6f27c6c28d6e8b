//! ADE Substrate - message substrate adapters
//!
//! Implementations of the `MessageSubstrate` port from `ade-core`:
//!
//! - **InMemorySubstrate**: process-local adapter preserving the full
//!   contract (consumer groups, ack-after-handler, redelivery, tail-
//!   positioned group creation). Default; used by tests.
//! - **RedisSubstrate**: Redis Streams adapter for production deployments
//!   (feature `redis-substrate`).
//!
//! Both adapters unwrap the transport frame centrally; handlers always
//! receive the bare application message.

pub mod framing;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis-substrate")]
pub mod redis;

pub use framing::Frame;

#[cfg(feature = "memory")]
pub use memory::InMemorySubstrate;

#[cfg(feature = "redis-substrate")]
pub use redis::RedisSubstrate;
