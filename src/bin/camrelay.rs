// camrelay: publish the local camera to a signaling room over WebRTC
//
// Usage: camrelay <host>

use anyhow::Context;
use camrelay::capture;
use camrelay::config::RelayConfig;
use camrelay::session::{Orchestrator, RunExit};
use camrelay::signaling::{SignalingClient, SignalingOptions};
use camrelay::webrtc::PeerFactory;
use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    camrelay::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: camrelay <host>");
        return ExitCode::from(2);
    }

    match run(&args[1]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(host: &str) -> anyhow::Result<()> {
    let config = RelayConfig::load_or_default();
    config.validate().context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(relay(host, config))
}

async fn relay(host: &str, config: RelayConfig) -> anyhow::Result<()> {
    let source = capture::open_source(&config.camera).context("failed to open camera")?;
    let source = capture::shared(source);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    })
    .context("failed to install interrupt handler")?;

    let options = SignalingOptions::new(host, &config.signaling)?;
    let (client, mut signals) = SignalingClient::connect(options)
        .await
        .context("failed to connect to signaling server")?;

    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
    let factory = PeerFactory::new(&config.session, &config.camera, source, peer_tx)
        .context("failed to initialise WebRTC engine")?;
    let mut orchestrator = Orchestrator::new(
        config.session.room.clone(),
        client.clone(),
        factory,
        config.session.idle_tick(),
    );

    if let Err(e) = orchestrator.start().await {
        orchestrator.shutdown().await;
        wait_closed(&client).await;
        return Err(e).context("failed to start peer session");
    }

    let exit = orchestrator.run(&mut signals, &mut peer_rx, &mut shutdown_rx).await;
    wait_closed(&client).await;

    match exit {
        RunExit::Interrupted => {
            log::info!("Stopped");
            Ok(())
        }
        RunExit::SignalingClosed => {
            log::warn!("Signaling channel ended");
            Ok(())
        }
        RunExit::SignalingFailed(e) => Err(e).context("lost signaling server"),
    }
}

async fn wait_closed(client: &SignalingClient) {
    if tokio::time::timeout(CLOSE_GRACE, client.closed()).await.is_err() {
        log::warn!("Signaling did not close within {:?}", CLOSE_GRACE);
    }
}
