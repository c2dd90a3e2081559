//! gRPC façade over the lifecycle engine.

use std::pin::Pin;
use std::sync::Arc;

use labgate_device::WgDevice;
use labgate_engine::{EngineError, LifecycleEngine, Peer};
use labgate_ipam::PostgresIpam;
use labgate_proto::{
    Client, ClientConfigRequest, ClientsAffectedResponse, ClientsRequest, ClientsResponse,
    ConfigResponse, EmptyRequest, EmptyResponse, MonitoringResponse, Wireguard,
};
use labgate_store::PostgresPeerStore;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error};
use uuid::Uuid;

use crate::status::{code, engine_status};

/// The production engine: kernel device, Postgres allocator, Postgres rows.
pub type Engine = LifecycleEngine<WgDevice, PostgresIpam, PostgresPeerStore>;

/// Parses a bulk-filter half: empty, malformed and nil values all mean
/// "match any".
fn filter_id(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value).ok().filter(|id| !id.is_nil())
}

fn to_proto(peer: &Peer) -> Client {
    Client {
        user_id: peer.id.user_id.to_string(),
        group_id: peer.id.group_id.to_string(),
        banned: peer.banned,
        last_seen: peer.last_seen,
    }
}

/// RPC service backed by the shared engine.
pub struct WireguardService {
    engine: Arc<Engine>,
}

impl WireguardService {
    /// Wraps the engine for serving.
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    async fn snapshot(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<Vec<Client>, Status> {
        let peers = self
            .engine
            .clients_with_handshake(user_id, group_id)
            .await
            .map_err(engine_status)?;
        Ok(peers.iter().map(to_proto).collect())
    }
}

#[tonic::async_trait]
impl Wireguard for WireguardService {
    async fn ping(
        &self,
        _request: Request<EmptyRequest>,
    ) -> Result<Response<EmptyResponse>, Status> {
        Ok(Response::new(EmptyResponse {}))
    }

    async fn get_clients(
        &self,
        request: Request<ClientsRequest>,
    ) -> Result<Response<ClientsResponse>, Status> {
        let request = request.into_inner();
        debug!(user_id = %request.user_id, group_id = %request.group_id, "getting clients");

        let clients = self
            .snapshot(filter_id(&request.user_id), filter_id(&request.group_id))
            .await?;
        Ok(Response::new(ClientsResponse { clients }))
    }

    async fn get_client_config(
        &self,
        request: Request<ClientConfigRequest>,
    ) -> Result<Response<ConfigResponse>, Status> {
        let request = request.into_inner();
        debug!(
            user_id = %request.user_id,
            group_id = %request.group_id,
            dest_cidr = %request.dest_cidr,
            "getting client config"
        );

        let user_id = Uuid::parse_str(&request.user_id)
            .map_err(|_| engine_status(EngineError::InvalidUserId))?;
        let group_id = Uuid::parse_str(&request.group_id)
            .map_err(|_| engine_status(EngineError::InvalidGroupId))?;

        let config = self
            .engine
            .get_or_create_client_config(user_id, group_id, &request.dest_cidr)
            .await
            .map_err(engine_status)?;
        Ok(Response::new(ConfigResponse { config }))
    }

    async fn delete_clients(
        &self,
        request: Request<ClientsRequest>,
    ) -> Result<Response<ClientsAffectedResponse>, Status> {
        let request = request.into_inner();
        let user_id = filter_id(&request.user_id);
        let group_id = filter_id(&request.group_id);

        // A remote caller never gets the both-halves-empty global wipe.
        if user_id.is_none() && group_id.is_none() {
            return Err(Status::invalid_argument(format!(
                "#{} at least one of userID or groupID is required",
                code::invalid_client_data(0)
            )));
        }

        debug!(user_id = %request.user_id, group_id = %request.group_id, "deleting clients");
        let affected = self
            .engine
            .delete_clients(user_id, group_id)
            .await
            .map_err(engine_status)?;
        Ok(Response::new(ClientsAffectedResponse {
            clients_affected: affected as i64,
        }))
    }

    async fn ban_clients(
        &self,
        request: Request<ClientsRequest>,
    ) -> Result<Response<ClientsAffectedResponse>, Status> {
        let request = request.into_inner();
        debug!(user_id = %request.user_id, group_id = %request.group_id, "banning clients");

        let affected = self
            .engine
            .ban_clients(filter_id(&request.user_id), filter_id(&request.group_id))
            .await
            .map_err(engine_status)?;
        Ok(Response::new(ClientsAffectedResponse {
            clients_affected: affected as i64,
        }))
    }

    async fn un_ban_clients(
        &self,
        request: Request<ClientsRequest>,
    ) -> Result<Response<ClientsAffectedResponse>, Status> {
        let request = request.into_inner();
        debug!(user_id = %request.user_id, group_id = %request.group_id, "unbanning clients");

        let affected = self
            .engine
            .unban_clients(filter_id(&request.user_id), filter_id(&request.group_id))
            .await
            .map_err(engine_status)?;
        Ok(Response::new(ClientsAffectedResponse {
            clients_affected: affected as i64,
        }))
    }

    type MonitoringStream =
        Pin<Box<dyn Stream<Item = Result<MonitoringResponse, Status>> + Send + 'static>>;

    async fn monitoring(
        &self,
        request: Request<Streaming<EmptyRequest>>,
    ) -> Result<Response<Self::MonitoringStream>, Status> {
        let mut inbound = request.into_inner();
        let engine = Arc::clone(&self.engine);
        let (tx, rx) = mpsc::channel::<Result<MonitoringResponse, Status>>(4);

        // One snapshot per inbound message; the server never emits on its
        // own schedule.
        tokio::spawn(async move {
            debug!("monitoring stream opened");
            loop {
                match inbound.message().await {
                    Ok(Some(_)) => {
                        let clients = match engine.clients_with_handshake(None, None).await {
                            Ok(peers) => peers.iter().map(to_proto).collect(),
                            Err(e) => {
                                error!(error = %e, "monitoring snapshot failed");
                                continue;
                            }
                        };
                        if tx.send(Ok(MonitoringResponse { clients })).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        debug!(error = %status, "monitoring receive failed");
                        break;
                    }
                }
            }
            debug!("monitoring stream closed");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
