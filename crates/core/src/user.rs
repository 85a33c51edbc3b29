// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User identity. Read-only to the core; created out of band (spec §3).

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Opaque, externally issued user identifier.
    pub struct UserId;
}

/// A user known to the core. The core never creates or mutates these;
/// they are provisioned by whatever external system owns accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
}
