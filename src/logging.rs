use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zombie_squirrel::config::LogConfig;

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when `log.dir` is set. RUST_LOG overrides `log.level`.
///
/// The returned guard flushes the file writer on drop and must be held
/// until exit.
pub fn init(config: &LogConfig, verbose: bool) -> Option<WorkerGuard> {
  let default_level = if verbose {
    "debug"
  } else {
    config.level.as_deref().unwrap_or("info")
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

  match &config.dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "zombie-squirrel.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::registry().with(filter).with(stderr).init();
      None
    }
  }
}
