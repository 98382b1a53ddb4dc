//! Process entry point: builds the configured pipeline, binds the UDP
//! endpoint, and wires `SIGTERM`/`SIGHUP` to clean shutdown/reinitialise
//! (spec §6). Daemonisation, pidfile handling, and uid/gid dropping are
//! external collaborators (spec §1) and are not implemented here.

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};

use static_dhcpd::config::Config;
use static_dhcpd::directory::EmptyDirectory;
use static_dhcpd::net::{self, Endpoint, WorkerPool};
use static_dhcpd::pipeline::{NoopHooks, Pipeline};

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_BIND_FAILURE: u8 = 2;
const EXIT_REINIT_FAILURE: u8 = 3;

fn main() -> ExitCode {
    env_logger::init();

    let server_ip = match std::env::var("STATIC_DHCPD_SERVER_IP") {
        Ok(value) => match value.parse::<Ipv4Addr>() {
            Ok(addr) => addr,
            Err(err) => {
                error!("invalid STATIC_DHCPD_SERVER_IP {value:?}: {err}");
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        },
        Err(_) => {
            error!("STATIC_DHCPD_SERVER_IP must be set to this host's DHCP-serving address");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let config = Config::with_server_ip(server_ip.into());
    let pxe_port = config.pxe_port;

    // A real deployment supplies a concrete directory backend (SQL,
    // HTTP-JSON, Redis) in front of a cache; those backends are out of
    // scope here (spec §1), so the pipeline runs with an empty one.
    let pipeline = Arc::new(Pipeline::new(
        config,
        Box::new(EmptyDirectory),
        Box::new(NoopHooks),
    ));

    let endpoint = match Endpoint::bind(server_ip, pxe_port) {
        Ok(endpoint) => Arc::new(endpoint),
        Err(err) => {
            error!("failed to bind DHCP sockets: {err}");
            return ExitCode::from(EXIT_BIND_FAILURE);
        }
    };

    let term_requested = Arc::new(AtomicBool::new(false));
    let reinit_requested = Arc::new(AtomicBool::new(false));

    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term_requested))
        .and(signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&reinit_requested)))
    {
        error!("failed to install signal handlers: {err}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let socket_alive = Arc::new(AtomicBool::new(true));
    let pool = Arc::new(WorkerPool::start(Arc::clone(&pipeline), Arc::clone(&endpoint), 8));

    let mut listeners = vec![spawn_listener(
        Arc::clone(&endpoint),
        Arc::clone(&pool),
        Arc::clone(&socket_alive),
        false,
    )];
    if pxe_port.is_some() {
        listeners.push(spawn_listener(
            Arc::clone(&endpoint),
            Arc::clone(&pool),
            Arc::clone(&socket_alive),
            true,
        ));
    }

    info!("static-dhcpd listening on {server_ip}:67");

    let exit_code = loop {
        if term_requested.load(Ordering::SeqCst) {
            break EXIT_OK;
        }

        if reinit_requested.swap(false, Ordering::SeqCst) {
            info!("SIGHUP received, reinitialising");
            if let Err(err) = pipeline.reinitialise() {
                error!("reinitialisation failed: {err}");
                break EXIT_REINIT_FAILURE;
            }
        }

        pool.tick();
        thread::sleep(Duration::from_secs(1));
    };

    info!("shutting down");
    socket_alive.store(false, Ordering::SeqCst);
    for listener in listeners.drain(..) {
        let _ = listener.join();
    }
    if let Ok(pool) = Arc::try_unwrap(pool) {
        pool.shutdown();
    }

    ExitCode::from(exit_code)
}

fn spawn_listener(
    endpoint: Arc<Endpoint>,
    pool: Arc<WorkerPool>,
    alive: Arc<AtomicBool>,
    pxe: bool,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let socket = if pxe {
            net::pxe_socket(&endpoint).expect("pxe socket requested but not bound")
        } else {
            net::dhcp_socket(&endpoint)
        };

        if let Err(err) = net::serve_socket(socket, pxe, &pool, &alive) {
            error!("listener ({}) stopped: {err}", if pxe { "pxe" } else { "dhcp" });
        }
    })
}
