// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Stable id paired with the configuration a worker is started from.
///
/// Two sources are the same iff both the id and the configuration are equal.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkSource<C> {
    pub id: String,
    pub config: C,
}

impl<C> WorkSource<C> {
    pub fn new(id: impl Into<String>, config: C) -> Self {
        Self { id: id.into(), config }
    }
}
