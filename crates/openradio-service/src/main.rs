use std::sync::Arc;

use openradio_proto::config::Config;
use openradio_proto::platform;
use openradio_service::backup::DirectoryTarget;
use openradio_service::core::{CoreParts, ServiceCore, ServiceEvent};
use openradio_service::engine::mpv::MpvEngineFactory;
use openradio_service::focus::ExclusiveFocus;
use openradio_service::provider::CatalogueClient;
use openradio_service::session::SessionUpdate;
use openradio_service::storage::Storage;
use openradio_service::{http, logging, socket};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Session updates first so logging can forward into them
    let (updates_tx, _) = broadcast::channel::<SessionUpdate>(100);

    let log_path = logging::init(&platform::data_dir(), updates_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let storage = Arc::new(Storage::open(&config.service.state_dir));
    let parts = CoreParts {
        storage,
        source: Arc::new(CatalogueClient::from_config(&config.catalogue, &config.network)),
        engines: Box::new(MpvEngineFactory),
        focus: Box::new(ExclusiveFocus::default()),
        backup_target: Arc::new(DirectoryTarget::new(config.backup.dir.clone())),
    };

    // Event channel: all external inputs funnel into ServiceCore
    let (event_tx, event_rx) = mpsc::channel::<ServiceEvent>(256);
    let core = ServiceCore::new(config.clone(), parts, event_tx, updates_tx);
    let handle = core.handle();

    let _socket_handle = socket::start_server(
        config.socket.bind_address.clone(),
        config.socket.port,
        handle.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            handle.clone(),
        );
    }

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = ctrl_c_handle.shutdown().await;
        }
    });

    info!("Service initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}
