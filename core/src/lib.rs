// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Runtime substrate for the Cadre multi-agent system.
//!
//! A fixed roster of LLM-backed agents collaborates by exchanging typed
//! messages through per-agent mailboxes and executing tasks drawn from a
//! shared priority queue. This crate provides the shared state, the message
//! plumbing, the scheduler and timer engines, and the agent lifecycle; the
//! `cadre` binary assembles them into a running node.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
