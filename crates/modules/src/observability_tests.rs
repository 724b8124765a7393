// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{config_channel, send_config};
use std::time::Duration;

fn with_level(level: &str) -> AgentConfiguration {
    AgentConfiguration {
        observability: Some(ObservabilityCF { logging: Some(LoggingCF { level: level.into() }) }),
        ..Default::default()
    }
}

#[test]
fn level_defaults_to_info() {
    let module = ObservabilityModule::new(Arc::new(FakeLogLevel::new()));
    let mut cfg = AgentConfiguration::default();
    module.default_and_validate(&mut cfg).unwrap();
    assert_eq!(cfg.observability.unwrap().logging.unwrap().level, "info");
}

#[yare::parameterized(
    debug = { "debug" },
    upper = { "WARN" },
    off = { "off" },
)]
fn known_levels_are_accepted(level: &str) {
    assert!(parse_level(level).is_ok());
}

#[test]
fn unknown_level_is_rejected() {
    let module = ObservabilityModule::new(Arc::new(FakeLogLevel::new()));
    let err = module.default_and_validate(&mut with_level("loud")).unwrap_err();
    assert_eq!(err, ModuleError::invalid("invalid log level: \"loud\""));
}

#[tokio::test]
async fn level_changes_are_applied_once() {
    let control = FakeLogLevel::new();
    let module = Arc::new(ObservabilityModule::new(Arc::new(control.clone())));
    let (mut tx, rx) = config_channel();
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let (module, cancel) = (Arc::clone(&module), cancel.clone());
        async move { module.run(cancel, rx).await }
    });

    send_config(&mut tx, with_level("debug")).await;
    send_config(&mut tx, with_level("debug")).await;
    send_config(&mut tx, with_level("warn")).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while control.levels().len() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(control.levels(), vec![LevelFilter::DEBUG, LevelFilter::WARN]);

    cancel.cancel();
    task.await.unwrap().unwrap();
}
