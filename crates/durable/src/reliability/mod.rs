//! Reliability patterns for durable execution.
//!
//! This module provides:
//! - [`retry`] - the fixed-delay, jittered retry used by task-level
//!   [`RetryConfig`](crate::model::RetryConfig) (C5, §4.3)
//!
//! Circuit breakers and a dead-letter queue are out of scope: neither
//! appears in the data model, and message-bus delivery guarantees are the
//! responsibility of the bus the engine is wired to, not this crate (§1).

pub mod retry;
