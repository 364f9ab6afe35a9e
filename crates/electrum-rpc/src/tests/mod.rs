//! Test module for electrum-rpc
//!
//! This module contains integration-style tests driven by a scripted
//! in-process server:
//! - Call correlation (out-of-order replies, concurrent callers, id hygiene)
//! - Subscription fan-out and unsubscription
//! - Reconnection and subscription resumption after a dropped link
//! - Typed method wrappers and broadcast rejection handling
//! - Session close semantics
