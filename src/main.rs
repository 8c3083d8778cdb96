use std::net::SocketAddr;

use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use mqtt_proxy_core::bridge::{Bridge, BridgeOutcome, BridgeTermination};
use mqtt_proxy_core::config::{ProxyConfig, ProxyConfigBuilder};

fn load_config() -> Result<ProxyConfig, Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = std::env::var("MQTT_PROXY_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:1883".to_string())
        .parse()?;
    let upstream_addr: SocketAddr = std::env::var("MQTT_PROXY_UPSTREAM")
        .unwrap_or_else(|_| "127.0.0.1:1884".to_string())
        .parse()?;

    let strict_flags = std::env::var("MQTT_PROXY_STRICT_FLAGS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let validate_connect_reserved_bit = std::env::var("MQTT_PROXY_VALIDATE_RESERVED_BIT")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Ok(ProxyConfigBuilder::new()
        .set_listen_addr(listen_addr)
        .set_upstream_addr(upstream_addr)
        .set_strict_flags(strict_flags)
        .set_validate_connect_reserved_bit(validate_connect_reserved_bit)
        .build()?)
}

#[tokio::main(flavor = "multi_thread", worker_threads = 10)]
async fn main() {
    #[cfg(debug_assertions)]
    {
        console_subscriber::init();
    }

    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to start: invalid config: {}", err);
            return;
        }
    };

    if let Err(err) = listen(config).await {
        error!("{}", err);
    }
}

async fn listen(config: ProxyConfig) -> Result<(), std::io::Error> {
    info!("listening on {}", config.listen_addr());
    info!("forwarding to upstream {}", config.upstream_addr());

    let listener = TcpListener::bind(config.listen_addr()).await?;
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    loop {
        select! {
            accepted = listener.accept() => {
                let (client, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!("accept failed: {}", err);
                        continue;
                    }
                };
                debug!("connection start: {:?}", addr);

                let upstream_addr = config.upstream_addr();
                let opts = config.decode_options();
                let max_packet_len = config.max_packet_len();
                let cancellation = token.clone();

                tracker.spawn(async move {
                    let upstream = match tokio::net::TcpStream::connect(upstream_addr).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            error!("failed to dial upstream {}: {}", upstream_addr, err);
                            return;
                        }
                    };

                    let (client_read, client_write) = client.into_split();
                    let (upstream_read, upstream_write) = upstream.into_split();

                    let bridge = Bridge::new(client_read, upstream_write, upstream_read, client_write)
                        .with_decode_options(opts)
                        .with_max_packet_len(max_packet_len);
                    let handle = bridge.start();
                    let bridge_token = handle.cancellation_token();

                    let termination = select! {
                        termination = handle.wait() => termination,
                        () = cancellation.cancelled() => {
                            bridge_token.cancel();
                            handle.wait().await
                        }
                    };

                    log_termination(&addr, &termination);
                });
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    info!("shutting down");
    token.cancel();
    tracker.close();
    tracker.wait().await;

    Ok(())
}

/// Logs both of a connection's worker outcomes at a level matching
/// severity: an I/O or protocol error surfaced to the caller is always
/// `error!`, a clean close or an externally-triggered cancellation is
/// `debug!`.
fn log_termination(addr: &SocketAddr, termination: &BridgeTermination) {
    log_outcome(addr, &termination.first);
    log_outcome(addr, &termination.second);
}

fn log_outcome(addr: &SocketAddr, outcome: &BridgeOutcome) {
    match outcome {
        BridgeOutcome::Errored { side, error } => {
            error!("connection {:?}: {:?} direction failed: {}", addr, side, error);
        }
        BridgeOutcome::Closed { side } => {
            debug!("connection {:?}: {:?} direction closed", addr, side);
        }
        BridgeOutcome::Cancelled { side } => {
            debug!("connection {:?}: {:?} direction cancelled", addr, side);
        }
    }
}
