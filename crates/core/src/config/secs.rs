// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional durations carried as whole seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => ser.serialize_some(&d.as_secs()),
        None => ser.serialize_none(),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(de)?.map(Duration::from_secs))
}
