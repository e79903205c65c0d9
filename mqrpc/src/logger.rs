//! `log` facade backed by an asynchronous `slog` drain.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};

use slog::{o, Drain, Logger};

use mqrpc_conf::logging::{Level, Log, To};

use crate::Result;

/// Installs the logger described by `log` as the global `log` backend
pub fn logger_init(log: &Log) -> Result<Logger> {
    let logger = config_logger(log.filename(), log.to, log.level);
    log::set_boxed_logger(Box::new(LoggerEx(logger.clone())))?;
    log::set_max_level(slog_log_to_level(log.level.inner()).to_level_filter());
    Ok(logger)
}

struct LoggerEx(Logger);

impl log::Log for LoggerEx {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let level = log_to_slog_level(r.metadata().level());
        let args = r.args();
        let target = r.target();
        let location = &record_as_location(r);
        let s = slog::RecordStatic { location, level, tag: target };

        self.0.log(&slog::Record::new(&s, args, slog::b!()))
    }

    fn flush(&self) {}
}

fn log_to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}

fn slog_log_to_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error | slog::Level::Critical => log::Level::Error,
    }
}

fn record_as_location(r: &log::Record) -> slog::RecordLocation {
    let module = r.module_path_static().unwrap_or("<unknown>");
    let file = r.file_static().unwrap_or("<unknown>");
    let line = r.line().unwrap_or_default();

    slog::RecordLocation { file, line, column: 0, function: "", module }
}

fn timestamp_local(io: &mut dyn io::Write) -> io::Result<()> {
    write!(io, "{}", mqrpc_utils::format_timestamp_millis_now())
}

/// Builds a root logger writing `<time> <LEVEL> <file:line> <msg>` lines
/// to the console, `filename`, both or nowhere
pub fn config_logger(filename: String, to: To, level: Level) -> Logger {
    let decorator = slog_term::PlainDecorator::new(WriteFilter::new(filename, to));
    let drain = slog_term::FullFormat::new(decorator)
        .use_custom_timestamp(timestamp_local)
        .use_file_location()
        .build()
        .fuse();

    let drain = LevelFilter { drain, level }.fuse();

    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Logger::root(drain, o!())
}

struct LevelFilter<D> {
    drain: D,
    level: Level,
}

impl<D> Drain for LevelFilter<D>
where
    D: Drain,
{
    type Ok = Option<D::Ok>;
    type Err = Option<D::Err>;

    fn log(&self, record: &slog::Record, values: &slog::OwnedKVList) -> std::result::Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.level.inner()) {
            self.drain.log(record, values).map(Some).map_err(Some)
        } else {
            Ok(None)
        }
    }
}

struct WriteFilter {
    filename: String,
    to: To,

    file: Option<File>,
    console: Stdout,
}

impl WriteFilter {
    fn new(filename: String, to: To) -> Self {
        Self { filename, to, file: None, console: io::stdout() }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(open_file(&self.filename)?);
        }
        self.file.as_mut().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "log file is not open"))
    }
}

impl io::Write for WriteFilter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.to {
            To::Console => self.console.write(buf)?,
            To::File => self.file()?.write(buf)?,
            To::Both => {
                let _ = self.console.write(buf)?;
                self.file()?.write(buf)?
            }
            To::Off => buf.len(),
        };
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.to {
            To::Console => self.console.flush()?,
            To::File => self.file()?.flush()?,
            To::Both => {
                self.console.flush()?;
                self.file()?.flush()?;
            }
            To::Off => {}
        };
        Ok(())
    }
}

fn open_file(filename: &str) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(filename).map_err(|e| {
        io::Error::new(e.kind(), format!("logger file config error, filename: {filename}, {e:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(log_to_slog_level(log::Level::Warn), slog::Level::Warning);
        assert_eq!(slog_log_to_level(slog::Level::Critical), log::Level::Error);
        assert_eq!(slog_log_to_level(log_to_slog_level(log::Level::Debug)), log::Level::Debug);
    }

    #[test]
    fn test_write_filter() {
        let path = std::env::temp_dir().join(format!("mqrpc-logger-{}.log", std::process::id()));
        let filename = path.to_string_lossy().into_owned();

        let mut off = WriteFilter::new(filename.clone(), To::Off);
        assert_eq!(off.write(b"dropped\n").unwrap(), 8);
        assert!(!path.exists());

        let mut file = WriteFilter::new(filename.clone(), To::File);
        file.write_all(b"kept\n").unwrap();
        file.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\n");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_config_logger() {
        let logger = config_logger(String::new(), To::Off, Level::from(slog::Level::Info));
        slog::info!(logger, "engine started"; "topic" => "agents/a/api/v1/in/app");
        slog::debug!(logger, "filtered out");
    }
}
