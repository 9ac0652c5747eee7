//! sw-client — console client entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at the configured level
//!   4. Boot a session; reboot it whenever it dies
//!   5. On Ctrl-C or `quit`: unload and exit

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use sw_client::error::AppError;
use sw_client::session::{Attach, Collaborators, Session, SessionExit};
use sw_client::transport::{HttpTransport, Transport, TransportError};
use sw_client::{config, console, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    // The stdin reader may still be parked on a blocking read.
    std::process::exit(0);
}

async fn run() -> Result<(), AppError> {
    // Optional; a missing .env is fine.
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config, false)?;

    info!(
        page_url = %config.server.page_url,
        log_level = %config.log_level,
        "config loaded"
    );

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                stop.cancel();
            }
        });
    }

    let (current_tx, current_rx) = watch::channel(None);
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = console::run(current_rx, stop).await {
                warn!("console exited: {e}");
            }
        });
    }

    let mut rebooting = false;
    loop {
        let attach = Attach::plan(&config.server, rebooting);
        let endpoint = attach.endpoint(&config.server).map_err(transport_err)?;
        let transport: Arc<dyn Transport> = Arc::new(
            HttpTransport::new(
                endpoint,
                config.request_timeout(),
                config.queue.post_threshold,
                config.server.session_cookie.clone(),
            )
            .map_err(transport_err)?,
        );

        let collaborators = Collaborators::defaults(Arc::clone(&transport), &config);
        let session = Session::boot(&config, transport, collaborators, attach.reason)?;
        info!(viewport_id = %attach.viewport_id, "session running");
        current_tx.send_replace(Some(session.handle()));

        match session.run(stop.clone()).await? {
            SessionExit::Shutdown => break,
            SessionExit::Reboot => {
                rebooting = true;
                current_tx.send_replace(None);
                info!("rebooting session");
            }
        }
    }

    info!("client stopped");
    Ok(())
}

fn transport_err(e: TransportError) -> AppError {
    AppError::Config(format!("transport setup failed: {e}"))
}
