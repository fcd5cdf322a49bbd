// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Multi-cluster managers and the process-wide accessor
//!
//! Code that takes a `&dyn MultiClustersManager` can be handed either manager
//! directly; `interface()` exists for call sites without one.

pub mod fake;
pub mod manager;

pub use fake::{FakeMultiClusterManager, set_fake};
pub use manager::{MultiClusterManager, MultiClustersManager};

/// The fake manager when fake mode is set, otherwise the live one.
///
/// Both are process-wide singletons, so calls in the same mode return the
/// same instance.
pub fn interface() -> &'static dyn MultiClustersManager {
    if fake::is_fake() {
        fake::fake_manager()
    } else {
        manager::live_manager()
    }
}

/// Alias of [`interface`]
pub fn active_manager() -> &'static dyn MultiClustersManager {
    interface()
}
