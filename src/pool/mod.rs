//! Connection management: pooled HTTP/1.1 connections and shared
//! HTTP/2 / HTTP/3 connections, keyed per host and protocol.

pub mod multiplexer;

pub use multiplexer::{
    ConnectSlot, ConnectionPool, H1Lease, H1Slot, PoolConfig, PoolKey, PoolStats, SharedHandle,
    SharedLease,
};
