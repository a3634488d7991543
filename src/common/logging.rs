use owo_colors::{OwoColorize, Stream};

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stdout,
    /// Used when stdout carries the program's output
    Stderr,
}

/// Enable the logger
pub fn enable_logger(verbose: bool, target: Target) -> Result<(), log::SetLoggerError> {
    let stream = match target {
        Target::Stdout => Stream::Stdout,
        Target::Stderr => Stream::Stderr,
    };

    let dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}{}: {}",
                // Level messages are padded to keep the output looking somewhat sane
                match record.level() {
                    log::Level::Error => "ERROR"
                        .if_supports_color(stream, |text| text.red())
                        .if_supports_color(stream, |text| text.bold())
                        .to_string(),
                    log::Level::Warn => "WARN "
                        .if_supports_color(stream, |text| text.yellow())
                        .if_supports_color(stream, |text| text.bold())
                        .to_string(),
                    log::Level::Info => "INFO "
                        .if_supports_color(stream, |text| text.green())
                        .if_supports_color(stream, |text| text.bold())
                        .to_string(),
                    log::Level::Debug => "DEBUG"
                        .if_supports_color(stream, |text| text.bright_blue())
                        .if_supports_color(stream, |text| text.bold())
                        .to_string(),
                    log::Level::Trace => "TRACE"
                        .if_supports_color(stream, |text| text.bright_white())
                        .if_supports_color(stream, |text| text.bold())
                        .to_string(),
                },
                // Only show the module path if verbose logging is enabled
                if verbose {
                    format!(" [{}]", record.target())
                } else {
                    String::new()
                }
                .if_supports_color(stream, |text| text.bright_black()),
                message
            ))
        })
        .level(if std::env::var_os("WGMESH_TRACE").is_some() {
            log::LevelFilter::Trace
        } else if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });

    match target {
        Target::Stdout => dispatch.chain(std::io::stdout()),
        Target::Stderr => dispatch.chain(std::io::stderr()),
    }
    .apply()
}
