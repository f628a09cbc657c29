use tracing_appender::non_blocking::WorkerGuard;

use crate::infra::config::Settings;

/// Configures structured logging to a daily-rolling file, matching the
/// teacher's `configure_tracing` shape. The returned guard must be kept
/// alive for the duration of the process so buffered events are flushed.
pub fn configure_tracing(settings: &Settings) -> WorkerGuard {
    let file_appender =
        tracing_appender::rolling::daily(settings.application.logs_directory.clone(), "keyflow.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt().with_ansi(false).with_writer(non_blocking).init();
    guard
}
