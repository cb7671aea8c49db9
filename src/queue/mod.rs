// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation queue and the advisory locks around it.

pub mod locks;
mod operation_queue;

pub use locks::{LockGuard, LockMap};
pub use operation_queue::OperationQueue;
pub(crate) use operation_queue::load_errors;
