use std::fs::File;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("reserva_migrate=debug")
        } else {
            EnvFilter::new("reserva_migrate=info")
        }
    })
}

/// Human-readable output in development, JSON lines otherwise. JSON goes to
/// `LOG_FILE` when it can be created, else to stderr.
pub fn try_init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let is_dev = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into()) == "development";
    let registry = tracing_subscriber::registry().with(env_filter(verbose));

    if is_dev {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_ansi(true)
            .with_writer(std::io::stderr);
        registry.with(fmt_layer).try_init()?;
    } else {
        let file = std::env::var("LOG_FILE").ok().and_then(|path| File::create(path).ok());
        if let Some(file) = file {
            let json_layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_target(true)
                .with_level(true)
                .with_line_number(true)
                .json();
            registry.with(json_layer).try_init()?;
        } else {
            let json_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_line_number(true)
                .with_ansi(false)
                .json();
            registry.with(json_layer).try_init()?;
        }
    }
    tracing::debug!("Logging initialized in {} mode", if is_dev { "development" } else { "production" });
    Ok(())
}

/// What an operator has to check after a panic in the given mode.
fn panic_followup(live: bool) -> &'static str {
    if live {
        "Live migration interrupted: documents may be partly migrated; restore from the backup directory or re-run with --force, and delete the tenant-to-owner sentinel in migration_locks if it remains"
    } else {
        "Dry run interrupted: nothing was written"
    }
}

pub fn set_panic_hook(live: bool) {
    std::panic::set_hook(Box::new(move |panic_info| {
        let followup = panic_followup(live);
        let (file, line) = panic_info
            .location()
            .map(|l| (l.file().to_string(), l.line()))
            .unwrap_or_else(|| ("<unknown>".to_string(), 0));
        tracing::error!(
            message = %panic_info,
            file = %file,
            line,
            live,
            "Migration panicked. {}",
            followup
        );
        eprintln!("PANIC: {}", panic_info);
        eprintln!("{}", followup);
    }));
}

pub fn init_logging_with_fallback(verbose: bool) {
    if let Err(e) = try_init_logging(verbose) {
        eprintln!("Failed to initialize structured logging: {}", e);
        eprintln!("Falling back to simple stderr logging");
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::io::stderr);
        if let Err(e) = tracing_subscriber::registry()
            .with(env_filter(verbose))
            .with(stderr_layer)
            .try_init()
        {
            eprintln!("Failed to initialize fallback logging: {}", e);
        }
    }
}
