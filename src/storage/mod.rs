// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local storage backends.
//!
//! - [`sqlite::SqliteStore`]: durable, runs compiled SQL
//! - [`memory::MemoryStore`]: evaluates the query AST in process
//!
//! Both implement [`traits::LocalStore`]. The engine's own bookkeeping
//! (queue, sync errors, delta tokens) lives in the tables declared in
//! [`system`].

pub mod memory;
pub mod sqlite;
pub mod system;
pub mod traits;
