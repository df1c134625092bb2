pub mod codec;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod receiver;
pub mod relay;
pub mod routes;
pub mod service;
pub mod store;

#[cfg(test)]
mod testutils;

use config::{Config, DeploymentMode};
use errors::Result;
use relay::{RelayReceiver, RelaySender};
use routes::RouteTable;
use service::{Dispatcher, IngestService};
use shared::admin_service::AdminService;
use shared::http::{bind, serve_listener};
use shared::shutdown::ShutdownListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::{RecordStore, StoreHandle};

/// Which parts of the pipeline this process runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// HTTP endpoint and, in relay mode, the receive loop
    All,
    /// HTTP endpoint only; in relay mode the receive loop lives elsewhere
    Http,
    /// Receive loop only
    Receiver,
}

/// Runs the selected components until `shutdown` fires.
///
/// Everything is bound before anything starts serving, so a port conflict
/// is reported without having accepted a single request.
pub async fn run(config: Config, role: Role, shutdown: ShutdownListener) -> Result<()> {
    let ready = Arc::new(AtomicBool::new(false));
    let store = RecordStore::new(&config.storage.path);

    let run_http = role != Role::Receiver;
    let run_receiver = match role {
        Role::All => config.mode == DeploymentMode::Relay,
        Role::Http => false,
        Role::Receiver => true,
    };
    if role == Role::Receiver && config.mode == DeploymentMode::Direct {
        tracing::warn!("Receiver role started while mode is direct; nothing will be relayed to it");
    }

    let relay_addr = relay::resolve(&config.relay.host, config.relay.port).await?;
    let relay_receiver = match run_receiver {
        true => Some(RelayReceiver::bind(relay_addr).await?),
        false => None,
    };

    let mut writer_task = None;
    let http = match run_http {
        true => {
            let dispatcher = match config.mode {
                DeploymentMode::Relay => {
                    Dispatcher::Relay(Arc::new(RelaySender::connect(relay_addr).await?))
                }
                DeploymentMode::Direct => {
                    let (handle, task) = StoreHandle::spawn(store.clone());
                    writer_task = Some(task);
                    Dispatcher::Direct(handle)
                }
            };
            let service = IngestService::new(
                RouteTable::from_config(&config.pages),
                dispatcher,
                format!("/{}", config.pages.message),
                config.max_body_size,
            );
            let (listener, _) = bind(&config.listener.host, config.listener.port).await?;
            Some((listener, service))
        }
        false => None,
    };

    let admin = match &config.admin_listener {
        Some(admin) => {
            let (listener, _) = bind(&admin.host, admin.port).await?;
            let ready = ready.clone();
            Some((listener, AdminService::new(move || ready.load(Ordering::Relaxed))))
        }
        None => None,
    };

    tracing::info!(
        role = ?role,
        mode = ?config.mode,
        relay = %relay_addr,
        storage = %config.storage.path.display(),
        "Starting submission pipeline"
    );
    ready.store(true, Ordering::Relaxed);

    let http_task = async {
        if let Some((listener, service)) = http {
            serve_listener(listener, service, shutdown.clone().wait()).await?;
        }
        Ok::<_, errors::IngestError>(())
    };
    let receiver_task = async {
        if let Some(relay_receiver) = relay_receiver {
            receiver::run_receive_loop(relay_receiver, store.clone(), shutdown.clone().wait())
                .await;
        }
        Ok::<_, errors::IngestError>(())
    };
    let admin_task = async {
        if let Some((listener, service)) = admin {
            serve_listener(listener, service, shutdown.clone().wait()).await?;
        }
        Ok::<_, errors::IngestError>(())
    };

    let result = tokio::try_join!(http_task, receiver_task, admin_task);
    ready.store(false, Ordering::Relaxed);

    // The HTTP service held the only store handle; the writer drains its
    // queue and exits once it is gone.
    if let Some(task) = writer_task {
        task.await?;
    }

    result.map(|_| ())
}
