use anyhow::Context;
use presence_agent::bridge::{HostMessage, LineNotifier, COMMAND_QUEUE_DEPTH};
use presence_agent::config::load_config;
use presence_agent::host::{HostSignal, TabTable};
use presence_agent::logging::init_logging;
use presence_agent::runtime::Runtime;
use presence_core::frame::{DecodeReport, LineFrameDecoder};
use presence_storage::{SessionStore, SqliteStorage};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _log_guard = init_logging(&config);

    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let storage = SqliteStorage::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let sessions = SessionStore::new(Arc::new(storage));
    let tabs = Arc::new(TabTable::new());
    let (notifier, host_writer) = LineNotifier::spawn(tokio::io::stdout(), COMMAND_QUEUE_DEPTH);
    let runtime = Runtime::start(
        config.runtime_options(),
        sessions,
        tabs.clone(),
        Arc::new(notifier),
    );
    info!(
        event = "agent_start",
        endpoint = %config.endpoint,
        db_path = %config.db_path.display()
    );

    let mut stdin = tokio::io::stdin();
    let mut decoder = LineFrameDecoder::<HostMessage>::new(config.max_frame_bytes);
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let read = tokio::select! {
            read = stdin.read(&mut buf) => read,
            _ = tokio::signal::ctrl_c() => {
                info!(event = "agent_interrupted");
                break;
            }
        };
        let report = match read {
            Ok(0) => {
                let report = decoder.finish();
                handle_report(&runtime, &tabs, report).await;
                info!(event = "host_stdin_closed");
                break;
            }
            Ok(read) => decoder.push_chunk(&buf[..read]),
            Err(err) => {
                warn!(event = "host_stdin_error", error = %err);
                break;
            }
        };
        handle_report(&runtime, &tabs, report).await;
    }

    runtime.shutdown();
    // Let queued notification lines reach the host before exiting.
    if tokio::time::timeout(Duration::from_secs(1), host_writer)
        .await
        .is_err()
    {
        warn!(event = "host_writer_flush_timeout");
    }
    Ok(())
}

async fn handle_report(runtime: &Runtime, tabs: &TabTable, report: DecodeReport<HostMessage>) {
    for err in report.errors {
        warn!(event = "host_message_dropped", error = %err);
    }
    for message in report.frames {
        let signal = HostSignal::from(message);
        // The mirror must reflect the event before the tracker snapshots it.
        if let HostSignal::Tab(event) = &signal {
            tabs.apply(event);
        }
        runtime.handle(signal).await;
    }
}
