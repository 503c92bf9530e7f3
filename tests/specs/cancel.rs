// SPDX-License-Identifier: MIT

//! S5: a process that ignores interrupt is force-killed.

use relay_adapters::{LifecycleEvent, NullSink, ProcessRunner, ProcessStatus, StartConfig};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn runaway_process_is_force_killed() {
    let runner = ProcessRunner::new();
    let (lifecycle_tx, mut lifecycle_rx) = tokio::sync::mpsc::channel(16);

    let mut config = StartConfig::new("s1", "/bin/sh");
    config.args = vec!["-c".into(), "trap '' INT; sleep 30".into()];
    config.env = std::env::vars().collect();
    config.cancel_grace = Duration::from_millis(300);

    let handle = runner
        .start(config, NullSink, NullSink, Some(lifecycle_tx))
        .await
        .unwrap();

    // Let the shell install its trap before interrupting
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();
    let result = handle.wait().await.unwrap();

    assert_eq!(result.status, ProcessStatus::Cancelled);
    assert!(result.cancelled);
    assert_eq!(result.signal.as_deref(), Some("SIGKILL"));

    let mut lifecycle = Vec::new();
    while let Ok(event) = lifecycle_rx.try_recv() {
        lifecycle.push(event);
    }
    assert!(lifecycle.contains(&LifecycleEvent::Cancelling));
    assert!(lifecycle.contains(&LifecycleEvent::Killing));
}
