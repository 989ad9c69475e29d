#[macro_use]
extern crate tracing;

use std::env;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use calloop::EventLoop;
use clap::Parser;
use inhibridge::bridge::Bridge;
use inhibridge::cli::{Cli, Sub};
use inhibridge::dbus::freedesktop_dbus::BusPeers;
use inhibridge::dbus::freedesktop_login1::Login1Inhibitor;
use inhibridge::dbus::freedesktop_screensaver::ScreenSaverEndpoint;
use inhibridge::liveness::LivenessMonitor;
use inhibridge::manual::{ManualController, ManualInhibit};
use inhibridge::notification::notifier;
use inhibridge::registry::Registry;
use inhibridge::shutdown::Services;
use inhibridge::status::ServiceStatus;
use inhibridge::utils::signals::{self, SignalRouter};
use inhibridge::utils::{program_name, IS_SYSTEMD_SERVICE};
use inhibridge_config::{Config, Log};
use sd_notify::NotifyState;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Before anything spawns a thread.
    signals::block_early().context("error blocking signals")?;

    let cli = Cli::parse();
    let config_path = cli.config_path()?;

    if let Some(Sub::Validate) = cli.subcommand {
        init_logging(&Log::default())?;
        config_path.load().map_err(|err| anyhow!("{err:?}"))?;
        info!("config is valid");
        return Ok(());
    }

    let mut config = config_path.load().map_err(|err| anyhow!("{err:?}"))?;
    cli.apply(&mut config);
    init_logging(&config.log)?;

    if env::var_os("NOTIFY_SOCKET").is_some() {
        IS_SYSTEMD_SERVICE.store(true, Ordering::Relaxed);
    }

    run(program_name(), config)
}

fn init_logging(log: &Log) -> anyhow::Result<()> {
    let default = if log.verbose {
        "inhibridge=debug,info"
    } else {
        "inhibridge=info,warn"
    };
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| default.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter);

    if let Some(path) = &log.file {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("error opening log file {path:?}"))?;
        subscriber
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    Ok(())
}

fn run(prog: String, config: Config) -> anyhow::Result<()> {
    // Setup. Any failure here exits before a single loop has started.
    let login1 = Login1Inhibitor::connect(&prog).context("error reaching logind")?;
    let system_conn = login1.connection().clone();

    let registry = Registry::new(Box::new(login1));
    let bridge = Arc::new(Bridge::new(registry, Box::new(ServiceStatus::new(&prog))));

    let screensaver = ScreenSaverEndpoint::start(bridge.clone())?;
    let session_conn = screensaver.connection().clone();
    let peers = BusPeers::new(&session_conn)?;

    let mut event_loop: EventLoop<SignalRouter> =
        EventLoop::try_new().context("error creating the event loop")?;
    signals::listen(&event_loop.handle(), |signal, router: &mut SignalRouter| {
        router.on_signal(signal)
    })
    .context("error listening for signals")?;

    // Loops.
    let liveness = LivenessMonitor::start(bridge.clone(), peers, config.heartbeat.interval())?;
    let manual = ManualController::start(ManualInhibit::new(
        bridge.clone(),
        notifier(!config.notifications.off, &prog),
        config.manual_inhibit.timeout(),
    ))?;

    let mut router = SignalRouter::new(manual.toggler(), event_loop.get_signal());

    if IS_SYSTEMD_SERVICE.load(Ordering::Relaxed) {
        if let Err(err) = sd_notify::notify(false, &[NotifyState::Ready]) {
            warn!("error notifying systemd: {err:?}");
        }
    }
    info!("running");

    event_loop
        .run(None, &mut router, |_| ())
        .context("error running the event loop")?;

    if IS_SYSTEMD_SERVICE.load(Ordering::Relaxed) {
        if let Err(err) = sd_notify::notify(false, &[NotifyState::Stopping]) {
            warn!("error notifying systemd: {err:?}");
        }
    }

    drop(router);
    let services = Services {
        inbound: Box::new(screensaver),
        manual,
        liveness,
        bridge,
        connections: vec![session_conn, system_conn],
    };
    services.shutdown();

    info!("goodbye");
    Ok(())
}
