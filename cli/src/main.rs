use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use config::ast::Settings;
use fstools::{FsOps, MountPair, SystemMounter};
use quota::{QuotaMonitor, QuotaTable};
use reactor::Reactor;
use reactor::bus::local::LocalBus;
use runner::LoggingExecutor;
use service::{CommandRestore, Fallback, HealthService, SESSION_MANAGER, session_registration};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod args;
mod pidfile;

use args::Args;
use pidfile::PidFile;

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging();
    let settings = config::load(args.config.as_deref())?;
    if args.detach {
        daemonize()?;
    }
    run(&args, &settings)
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .init();
}

fn daemonize() -> Result<()> {
    // SAFETY: no threads have been started yet.
    if unsafe { libc::daemon(1, 1) } != 0 {
        return Err(io::Error::last_os_error()).context("Failed to detach from the terminal");
    }
    Ok(())
}

fn run(args: &Args, settings: &Settings) -> Result<()> {
    let bus = LocalBus::open(&settings.bus.address).context("Failed to open the bus")?;
    let mut reactor = Reactor::new(bus, settings.bus.name.as_str())?;

    let partition = &settings.partition;
    let ops = FsOps::new(
        MountPair::new(&partition.cache_path, &partition.write_through_path),
        &partition.tools_dir,
        SystemMounter,
        LoggingExecutor,
    );
    let restore = CommandRestore::new(
        settings.restore.command.clone(),
        &settings.restore.bundle,
        LoggingExecutor,
    );
    let service = HealthService::new(settings.bus.interface.as_str(), ops, restore);
    reactor
        .register_object_path(&settings.bus.object_path, Box::new(service))
        .context("Failed to register the health object")?;
    reactor
        .register_fallback(Box::new(Fallback))
        .context("Failed to register the fallback handler")?;

    if let Err(e) = reactor.call(SESSION_MANAGER, session_registration()) {
        warn!("Could not register the persistence failure session: {e}");
    }

    let pid_file = PidFile::create(&settings.daemon.pid_file)
        .inspect_err(|e| warn!(path = %settings.daemon.pid_file.display(), "No pid file: {e}"))
        .ok();
    reactor.install_signal_handlers()?;

    if args.monitor {
        start_monitor(&mut reactor, settings);
    }
    reactor.on_shutdown(move || drop(pid_file));

    info!(pid = std::process::id(), "Persistence health monitor started");
    reactor.run().context("Reactor failed")
}

/// A monitor that cannot start leaves the daemon running without it.
fn start_monitor<B: reactor::bus::BusConnection>(reactor: &mut Reactor<B>, settings: &Settings) {
    let monitor = &settings.monitor;
    let table = match QuotaTable::load(&monitor.quota_config) {
        Ok(table) => table,
        Err(e) => {
            error!("Quota monitor disabled: {e}");
            return;
        }
    };
    match QuotaMonitor::new(&monitor.root, monitor.period(), table).spawn() {
        Ok(handle) => reactor.on_shutdown(move || {
            if let Err(e) = handle.stop() {
                error!("Stopping quota monitor: {e}");
            }
        }),
        Err(e) => error!("Quota monitor disabled: {e}"),
    }
}
