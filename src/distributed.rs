//! # Distributed Layer
//!
//! gRPC services for the sharded deployment: `ShardNode` hosts one
//! `ShardHandler` behind the per-shard query surface, and `AggregatorNode`
//! is the stateless dispatcher clients talk to. The aggregator routes
//! single-owner primitives by `id mod num_shards`, fans out node-set
//! primitives to every shard, and runs the two-phase neighbor-attribute
//! query; it rewrites shard-local node ids to global ids on the way out and
//! keeps no cache between requests.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Response, Status};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::input;
use crate::model::{Assoc, Partition};
use crate::shard::{ShardHandler, ShardOptions};

pub mod proto {
    tonic::include_proto!("taograph");
}

use proto::aggregator_service_server::AggregatorService;
use proto::shard_service_client::ShardServiceClient;
use proto::shard_service_server::ShardService;

impl From<Assoc> for proto::Assoc {
    fn from(a: Assoc) -> Self {
        Self {
            src_id: a.src_id,
            dst_id: a.dst_id,
            atype: a.atype,
            timestamp: a.time,
            attr: a.attr,
        }
    }
}

impl From<proto::Assoc> for Assoc {
    fn from(a: proto::Assoc) -> Self {
        Self {
            src_id: a.src_id,
            dst_id: a.dst_id,
            atype: a.atype,
            time: a.timestamp,
            attr: a.attr,
        }
    }
}

fn assoc_response(assocs: Vec<Assoc>) -> Response<proto::AssocListResponse> {
    Response::new(proto::AssocListResponse {
        assocs: assocs.into_iter().map(Into::into).collect(),
    })
}

// ---------------------------------------------------------------------------
// Shard node
// ---------------------------------------------------------------------------

/// How a shard builds its stores at `init()`.
#[derive(Debug, Clone)]
pub struct ShardBootstrap {
    pub partition: Partition,
    /// Construct from TSV inputs (persisting artifacts next to them) or load
    /// prebuilt artifacts.
    pub construct: bool,
    pub node_file: Option<PathBuf>,
    pub edge_file: Option<PathBuf>,
    /// Fixed attribute count of node records.
    pub num_attrs: usize,
    pub options: ShardOptions,
}

/// gRPC host of one shard. `init` builds or loads the stores exactly once;
/// repeated calls are no-ops.
pub struct ShardNode {
    bootstrap: Option<ShardBootstrap>,
    handler: parking_lot::RwLock<Option<Arc<ShardHandler>>>,
}

impl ShardNode {
    /// A node that builds its stores from files on `init()`.
    pub fn new(bootstrap: ShardBootstrap) -> Self {
        Self {
            bootstrap: Some(bootstrap),
            handler: parking_lot::RwLock::new(None),
        }
    }

    /// A node around an already-built handler (tests, embedded use). Counts
    /// as initialized.
    pub fn with_handler(handler: Arc<ShardHandler>) -> Self {
        Self {
            bootstrap: None,
            handler: parking_lot::RwLock::new(Some(handler)),
        }
    }

    /// Shared access to the handler, e.g. for co-located writers.
    pub fn handler(&self) -> Option<Arc<ShardHandler>> {
        self.handler.read().clone()
    }

    fn require_handler(&self) -> Result<Arc<ShardHandler>, Status> {
        self.handler
            .read()
            .clone()
            .ok_or_else(|| Status::failed_precondition("shard not initialized"))
    }

    fn initialize(&self) -> Result<i32, Status> {
        {
            let guard = self.handler.read();
            if guard.is_some() {
                info!("init: shard already initialized");
                return Ok(0);
            }
        }
        let Some(bootstrap) = &self.bootstrap else {
            return Err(Status::failed_precondition(
                "shard has no bootstrap configuration",
            ));
        };

        let built = input::build_shard(bootstrap).map_err(StoreError::into_status)?;
        let mut guard = self.handler.write();
        if guard.is_none() {
            *guard = Some(Arc::new(built));
            info!(
                shard_id = bootstrap.partition.shard_id,
                "shard initialized"
            );
        }
        Ok(0)
    }
}

#[tonic::async_trait]
impl ShardService for ShardNode {
    async fn init(
        &self,
        _request: Request<proto::InitRequest>,
    ) -> Result<Response<proto::InitResponse>, Status> {
        let code = self.initialize()?;
        Ok(Response::new(proto::InitResponse { code }))
    }

    async fn get_neighbors(
        &self,
        request: Request<proto::NodeIdRequest>,
    ) -> Result<Response<proto::NeighborsResponse>, Status> {
        let handler = self.require_handler()?;
        let ids = handler
            .get_neighbors(request.into_inner().node_id)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::NeighborsResponse {
            ids,
            partial: false,
        }))
    }

    async fn get_neighbors_atype(
        &self,
        request: Request<proto::NodeAtypeRequest>,
    ) -> Result<Response<proto::NeighborsResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let ids = handler
            .get_neighbors_atype(req.node_id, req.atype)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::NeighborsResponse {
            ids,
            partial: false,
        }))
    }

    async fn get_edge_attrs(
        &self,
        request: Request<proto::NodeAtypeRequest>,
    ) -> Result<Response<proto::EdgeAttrsResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let attrs = handler
            .get_edge_attrs(req.node_id, req.atype)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::EdgeAttrsResponse { attrs }))
    }

    async fn get_nodes(
        &self,
        request: Request<proto::NodeAttrRequest>,
    ) -> Result<Response<proto::NodeSetResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let ids = handler
            .get_nodes(req.attr_id as u32, &req.key)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::NodeSetResponse {
            ids,
            partial: false,
        }))
    }

    async fn get_nodes2(
        &self,
        request: Request<proto::NodeAttr2Request>,
    ) -> Result<Response<proto::NodeSetResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let ids = handler
            .get_nodes2(req.attr_id1 as u32, &req.key1, req.attr_id2 as u32, &req.key2)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::NodeSetResponse {
            ids,
            partial: false,
        }))
    }

    async fn get_attribute_local(
        &self,
        request: Request<proto::GetAttributeRequest>,
    ) -> Result<Response<proto::GetAttributeResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let value = handler
            .get_attribute(req.node_id, req.attr_id as u32)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::GetAttributeResponse {
            found: value.is_some(),
            value: value.unwrap_or_default().into_bytes(),
        }))
    }

    async fn filter_nodes(
        &self,
        request: Request<proto::FilterNodesRequest>,
    ) -> Result<Response<proto::FilterNodesResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let ids = handler
            .filter_nodes(&req.ids, req.attr_id as u32, &req.key)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::FilterNodesResponse {
            ids,
            partial: false,
        }))
    }

    async fn assoc_range(
        &self,
        request: Request<proto::AssocRangeRequest>,
    ) -> Result<Response<proto::AssocListResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let off = usize::try_from(req.off)
            .map_err(|_| Status::invalid_argument("off must be non-negative"))?;
        let len = usize::try_from(req.len)
            .map_err(|_| Status::invalid_argument("len must be non-negative"))?;
        let assocs = handler
            .assoc_range(req.src, req.atype, off, len)
            .map_err(StoreError::into_status)?;
        Ok(assoc_response(assocs))
    }

    async fn assoc_count(
        &self,
        request: Request<proto::AssocCountRequest>,
    ) -> Result<Response<proto::AssocCountResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let count = handler
            .assoc_count(req.src, req.atype)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::AssocCountResponse { count }))
    }

    async fn assoc_get(
        &self,
        request: Request<proto::AssocGetRequest>,
    ) -> Result<Response<proto::AssocListResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let dst_set: HashSet<i64> = req.dst_id_set.into_iter().collect();
        let assocs = handler
            .assoc_get(req.src, req.atype, &dst_set, req.t_low, req.t_high)
            .map_err(StoreError::into_status)?;
        Ok(assoc_response(assocs))
    }

    async fn obj_get(
        &self,
        request: Request<proto::ObjGetRequest>,
    ) -> Result<Response<proto::ObjGetResponse>, Status> {
        let handler = self.require_handler()?;
        let attrs = handler
            .obj_get(request.into_inner().node_id)
            .map_err(StoreError::into_status)?;
        Ok(Response::new(proto::ObjGetResponse {
            attrs: attrs.into_iter().map(String::into_bytes).collect(),
        }))
    }

    async fn assoc_time_range(
        &self,
        request: Request<proto::AssocTimeRangeRequest>,
    ) -> Result<Response<proto::AssocListResponse>, Status> {
        let handler = self.require_handler()?;
        let req = request.into_inner();
        let limit = usize::try_from(req.limit)
            .map_err(|_| Status::invalid_argument("limit must be non-negative"))?;
        let assocs = handler
            .assoc_time_range(req.src, req.atype, req.t_low, req.t_high, limit)
            .map_err(StoreError::into_status)?;
        Ok(assoc_response(assocs))
    }
}

// ---------------------------------------------------------------------------
// Aggregator node
// ---------------------------------------------------------------------------

/// Round-robin pool of channels to one shard. Each call clones a client off
/// the pool; tonic channels multiplex, the pool bounds head-of-line
/// blocking under fan-out load.
struct ShardPool {
    clients: Vec<ShardServiceClient<Channel>>,
    next: AtomicUsize,
}

impl ShardPool {
    fn client(&self) -> ShardServiceClient<Channel> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[idx].clone()
    }
}

/// Aggregator tuning knobs.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Channels opened to each shard.
    pub pool_size: usize,
    /// Fail the whole request when any shard of a fan-out fails; the default
    /// returns the partial union and flags it.
    pub strict_fanout: bool,
    pub rpc_timeout: Duration,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            pool_size: 4,
            strict_fanout: false,
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

/// Stateless dispatcher over the shard fleet. Holds connection handles and
/// the shard count; nothing else survives a request.
pub struct AggregatorNode {
    pools: Vec<ShardPool>,
    num_shards: u32,
    options: AggregatorOptions,
    initialized: AtomicBool,
}

/// Retry a call once on a transient transport error. Shards never retry;
/// this is the only retry in the system.
async fn retry_once<T, F, Fut>(mut call: F) -> Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    match call().await {
        Err(status) if status.code() == Code::Unavailable => call().await,
        other => other,
    }
}

impl AggregatorNode {
    /// Connect `pool_size` channels to every shard address, in shard-id
    /// order.
    pub async fn connect(
        shard_addrs: Vec<String>,
        options: AggregatorOptions,
    ) -> Result<Self, Status> {
        if shard_addrs.is_empty() {
            return Err(Status::invalid_argument("no shard addresses"));
        }
        let mut pools = Vec::with_capacity(shard_addrs.len());
        for addr in &shard_addrs {
            let endpoint = Endpoint::from_shared(addr.clone())
                .map_err(|err| Status::invalid_argument(err.to_string()))?
                .timeout(options.rpc_timeout);
            let mut clients = Vec::with_capacity(options.pool_size);
            for _ in 0..options.pool_size.max(1) {
                let channel = endpoint
                    .connect()
                    .await
                    .map_err(|err| Status::unavailable(err.to_string()))?;
                clients.push(ShardServiceClient::new(channel));
            }
            pools.push(ShardPool {
                clients,
                next: AtomicUsize::new(0),
            });
        }
        let num_shards = pools.len() as u32;
        info!(num_shards, "aggregator connected to shard fleet");
        Ok(Self {
            pools,
            num_shards,
            options,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    fn partition_for(&self, shard_id: u32) -> Partition {
        Partition::new(shard_id, self.num_shards)
    }

    fn owner_pool(&self, global_id: i64) -> (&ShardPool, Partition) {
        let shard_id = global_id.rem_euclid(self.num_shards as i64) as u32;
        (&self.pools[shard_id as usize], self.partition_for(shard_id))
    }

    async fn init_shards(&self) -> Result<i32, Status> {
        let futures = self.pools.iter().map(|pool| {
            retry_once(move || {
                let mut client = pool.client();
                async move {
                    client
                        .init(Request::new(proto::InitRequest {}))
                        .await
                        .map(|resp| resp.into_inner().code)
                }
            })
        });
        let codes = join_all(futures).await;
        let mut max_code = 0;
        for code in codes {
            max_code = max_code.max(code?);
        }
        Ok(max_code)
    }

    /// Fan out `get_nodes`-shaped lookups, rewriting local ids to global.
    async fn fan_out_nodes<F, Fut>(&self, call: F) -> Result<proto::NodeSetResponse, Status>
    where
        F: Fn(ShardServiceClient<Channel>) -> Fut,
        Fut: Future<Output = Result<Vec<i64>, Status>>,
    {
        let futures = self.pools.iter().enumerate().map(|(shard_id, pool)| {
            let call = &call;
            async move {
                let result = retry_once(|| call(pool.client())).await;
                (shard_id as u32, result)
            }
        });

        let mut ids = Vec::new();
        let mut failed = 0usize;
        for (shard_id, result) in join_all(futures).await {
            match result {
                Ok(locals) => {
                    let partition = self.partition_for(shard_id);
                    ids.extend(locals.into_iter().map(|local| partition.global_of(local)));
                }
                Err(status) => {
                    warn!(shard_id, %status, "shard failed during fan-out");
                    failed += 1;
                }
            }
        }

        if failed > 0 && self.options.strict_fanout {
            return Err(StoreError::PartialUnavailable {
                failed,
                total: self.pools.len(),
            }
            .into_status());
        }
        Ok(proto::NodeSetResponse {
            ids,
            partial: failed > 0,
        })
    }
}

#[tonic::async_trait]
impl AggregatorService for AggregatorNode {
    async fn init(
        &self,
        _request: Request<proto::InitRequest>,
    ) -> Result<Response<proto::InitResponse>, Status> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(Response::new(proto::InitResponse { code: 0 }));
        }
        let code = self.init_shards().await?;
        Ok(Response::new(proto::InitResponse { code }))
    }

    async fn local_data_init(
        &self,
        _request: Request<proto::InitRequest>,
    ) -> Result<Response<proto::InitResponse>, Status> {
        // Re-issues shard init unconditionally; the shards themselves are
        // idempotent.
        let code = self.init_shards().await?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(Response::new(proto::InitResponse { code }))
    }

    async fn get_neighbors(
        &self,
        request: Request<proto::NodeIdRequest>,
    ) -> Result<Response<proto::NeighborsResponse>, Status> {
        let req = request.into_inner();
        let (pool, _) = self.owner_pool(req.node_id);
        let response = retry_once(|| {
            let mut client = pool.client();
            let req = req.clone();
            async move { client.get_neighbors(Request::new(req)).await }
        })
        .await?;
        Ok(response)
    }

    async fn get_neighbors_atype(
        &self,
        request: Request<proto::NodeAtypeRequest>,
    ) -> Result<Response<proto::NeighborsResponse>, Status> {
        let req = request.into_inner();
        let (pool, _) = self.owner_pool(req.node_id);
        let response = retry_once(|| {
            let mut client = pool.client();
            let req = req.clone();
            async move { client.get_neighbors_atype(Request::new(req)).await }
        })
        .await?;
        Ok(response)
    }

    async fn get_edge_attrs(
        &self,
        request: Request<proto::NodeAtypeRequest>,
    ) -> Result<Response<proto::EdgeAttrsResponse>, Status> {
        let req = request.into_inner();
        let (pool, _) = self.owner_pool(req.node_id);
        let response = retry_once(|| {
            let mut client = pool.client();
            let req = req.clone();
            async move { client.get_edge_attrs(Request::new(req)).await }
        })
        .await?;
        Ok(response)
    }

    async fn get_nodes(
        &self,
        request: Request<proto::NodeAttrRequest>,
    ) -> Result<Response<proto::NodeSetResponse>, Status> {
        let req = request.into_inner();
        let merged = self
            .fan_out_nodes(|mut client| {
                let req = req.clone();
                async move {
                    client
                        .get_nodes(Request::new(req))
                        .await
                        .map(|resp| resp.into_inner().ids)
                }
            })
            .await?;
        Ok(Response::new(merged))
    }

    async fn get_nodes2(
        &self,
        request: Request<proto::NodeAttr2Request>,
    ) -> Result<Response<proto::NodeSetResponse>, Status> {
        let req = request.into_inner();
        let merged = self
            .fan_out_nodes(|mut client| {
                let req = req.clone();
                async move {
                    client
                        .get_nodes2(Request::new(req))
                        .await
                        .map(|resp| resp.into_inner().ids)
                }
            })
            .await?;
        Ok(Response::new(merged))
    }

    async fn get_neighbors_attr(
        &self,
        request: Request<proto::NeighborsAttrRequest>,
    ) -> Result<Response<proto::NeighborsResponse>, Status> {
        let req = request.into_inner();

        // Phase 1: neighbor ids from the shard owning the source node.
        let (pool, _) = self.owner_pool(req.node_id);
        let neighbors = retry_once(|| {
            let mut client = pool.client();
            let phase1 = proto::NodeIdRequest {
                node_id: req.node_id,
            };
            async move { client.get_neighbors(Request::new(phase1)).await }
        })
        .await?
        .into_inner()
        .ids;

        // Phase 2: bucket neighbors by owning shard and filter by attribute
        // where they live. Intra-bucket order is preserved.
        let mut buckets: Vec<Vec<i64>> = vec![Vec::new(); self.num_shards as usize];
        for dst in neighbors {
            let shard_id = dst.rem_euclid(self.num_shards as i64) as usize;
            buckets[shard_id].push(dst);
        }

        let futures = buckets
            .into_iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(shard_id, bucket)| {
                let partition = self.partition_for(shard_id as u32);
                let pool = &self.pools[shard_id];
                let attr_id = req.attr_id;
                let key = req.key.clone();
                async move {
                    let locals: Vec<i64> =
                        bucket.iter().map(|&dst| partition.local_of(dst)).collect();
                    let result = retry_once(|| {
                        let mut client = pool.client();
                        let filter = proto::FilterNodesRequest {
                            ids: locals.clone(),
                            attr_id,
                            key: key.clone(),
                        };
                        async move { client.filter_nodes(Request::new(filter)).await }
                    })
                    .await;
                    (shard_id as u32, partition, result)
                }
            });

        let mut ids = Vec::new();
        let mut failed = 0usize;
        for (shard_id, partition, result) in join_all(futures).await {
            match result {
                Ok(resp) => ids.extend(
                    resp.into_inner()
                        .ids
                        .into_iter()
                        .map(|local| partition.global_of(local)),
                ),
                Err(status) => {
                    warn!(shard_id, %status, "shard failed during neighbor-attr filter");
                    failed += 1;
                }
            }
        }
        if failed > 0 && self.options.strict_fanout {
            return Err(StoreError::PartialUnavailable {
                failed,
                total: self.pools.len(),
            }
            .into_status());
        }
        Ok(Response::new(proto::NeighborsResponse {
            ids,
            partial: failed > 0,
        }))
    }

    async fn get_attribute(
        &self,
        request: Request<proto::GetAttributeRequest>,
    ) -> Result<Response<proto::GetAttributeResponse>, Status> {
        let req = request.into_inner();
        let (pool, partition) = self.owner_pool(req.node_id);
        let local = proto::GetAttributeRequest {
            node_id: partition.local_of(req.node_id),
            attr_id: req.attr_id,
        };
        let response = retry_once(|| {
            let mut client = pool.client();
            let local = local.clone();
            async move { client.get_attribute_local(Request::new(local)).await }
        })
        .await?;
        Ok(response)
    }

    async fn filter_nodes(
        &self,
        request: Request<proto::FilterNodesRequest>,
    ) -> Result<Response<proto::FilterNodesResponse>, Status> {
        let req = request.into_inner();

        let mut buckets: Vec<Vec<i64>> = vec![Vec::new(); self.num_shards as usize];
        for id in &req.ids {
            buckets[id.rem_euclid(self.num_shards as i64) as usize].push(*id);
        }

        let futures = buckets
            .into_iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(shard_id, bucket)| {
                let partition = self.partition_for(shard_id as u32);
                let pool = &self.pools[shard_id];
                let attr_id = req.attr_id;
                let key = req.key.clone();
                async move {
                    let locals: Vec<i64> =
                        bucket.iter().map(|&id| partition.local_of(id)).collect();
                    let result = retry_once(|| {
                        let mut client = pool.client();
                        let filter = proto::FilterNodesRequest {
                            ids: locals.clone(),
                            attr_id,
                            key: key.clone(),
                        };
                        async move { client.filter_nodes(Request::new(filter)).await }
                    })
                    .await;
                    (shard_id as u32, partition, result)
                }
            });

        let mut ids = Vec::new();
        let mut failed = 0usize;
        for (shard_id, partition, result) in join_all(futures).await {
            match result {
                Ok(resp) => ids.extend(
                    resp.into_inner()
                        .ids
                        .into_iter()
                        .map(|local| partition.global_of(local)),
                ),
                Err(status) => {
                    warn!(shard_id, %status, "shard failed during filter fan-out");
                    failed += 1;
                }
            }
        }
        if failed > 0 && self.options.strict_fanout {
            return Err(StoreError::PartialUnavailable {
                failed,
                total: self.pools.len(),
            }
            .into_status());
        }
        Ok(Response::new(proto::FilterNodesResponse {
            ids,
            partial: failed > 0,
        }))
    }

    async fn assoc_range(
        &self,
        request: Request<proto::AssocRangeRequest>,
    ) -> Result<Response<proto::AssocListResponse>, Status> {
        let req = request.into_inner();
        let (pool, _) = self.owner_pool(req.src);
        let response = retry_once(|| {
            let mut client = pool.client();
            let req = req.clone();
            async move { client.assoc_range(Request::new(req)).await }
        })
        .await?;
        Ok(response)
    }

    async fn assoc_count(
        &self,
        request: Request<proto::AssocCountRequest>,
    ) -> Result<Response<proto::AssocCountResponse>, Status> {
        let req = request.into_inner();
        let (pool, _) = self.owner_pool(req.src);
        let response = retry_once(|| {
            let mut client = pool.client();
            let req = req.clone();
            async move { client.assoc_count(Request::new(req)).await }
        })
        .await?;
        Ok(response)
    }

    async fn assoc_get(
        &self,
        request: Request<proto::AssocGetRequest>,
    ) -> Result<Response<proto::AssocListResponse>, Status> {
        let req = request.into_inner();
        let (pool, _) = self.owner_pool(req.src);
        let response = retry_once(|| {
            let mut client = pool.client();
            let req = req.clone();
            async move { client.assoc_get(Request::new(req)).await }
        })
        .await?;
        Ok(response)
    }

    async fn obj_get(
        &self,
        request: Request<proto::ObjGetRequest>,
    ) -> Result<Response<proto::ObjGetResponse>, Status> {
        let req = request.into_inner();
        let (pool, partition) = self.owner_pool(req.node_id);
        let local = proto::ObjGetRequest {
            node_id: partition.local_of(req.node_id),
        };
        let response = retry_once(|| {
            let mut client = pool.client();
            let local = local.clone();
            async move { client.obj_get(Request::new(local)).await }
        })
        .await?;
        Ok(response)
    }

    async fn assoc_time_range(
        &self,
        request: Request<proto::AssocTimeRangeRequest>,
    ) -> Result<Response<proto::AssocListResponse>, Status> {
        let req = request.into_inner();
        let (pool, _) = self.owner_pool(req.src);
        let response = retry_once(|| {
            let mut client = pool.client();
            let req = req.clone();
            async move { client.assoc_time_range(Request::new(req)).await }
        })
        .await?;
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Blocking client
// ---------------------------------------------------------------------------

use proto::aggregator_service_client::AggregatorServiceClient;

/// Blocking aggregator handle for synchronous callers, above all the
/// benchmark driver threads. Each instance owns its own single-thread
/// runtime and channel: one exclusive handle per driver thread, never
/// shared.
pub struct AggregatorClient {
    runtime: tokio::runtime::Runtime,
    client: AggregatorServiceClient<Channel>,
}

impl AggregatorClient {
    /// Connect and run `init()` on the cluster.
    pub fn connect(addr: &str) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let endpoint = Endpoint::from_shared(addr.to_string())?;
        let mut client = runtime.block_on(async {
            let channel = endpoint.connect().await?;
            Ok::<_, anyhow::Error>(AggregatorServiceClient::new(channel))
        })?;
        let code = runtime
            .block_on(client.init(Request::new(proto::InitRequest {})))?
            .into_inner()
            .code;
        info!(code, "aggregator init complete");
        Ok(Self { runtime, client })
    }
}

impl crate::GraphReader for AggregatorClient {
    fn get_neighbors(&mut self, node_id: i64) -> anyhow::Result<Vec<i64>> {
        let resp = self
            .runtime
            .block_on(self.client.get_neighbors(Request::new(proto::NodeIdRequest {
                node_id,
            })))?;
        Ok(resp.into_inner().ids)
    }

    fn get_neighbors_atype(&mut self, node_id: i64, atype: i64) -> anyhow::Result<Vec<i64>> {
        let resp = self.runtime.block_on(self.client.get_neighbors_atype(
            Request::new(proto::NodeAtypeRequest { node_id, atype }),
        ))?;
        Ok(resp.into_inner().ids)
    }

    fn get_neighbors_attr(
        &mut self,
        node_id: i64,
        attr_id: u32,
        key: &str,
    ) -> anyhow::Result<Vec<i64>> {
        let resp = self.runtime.block_on(self.client.get_neighbors_attr(
            Request::new(proto::NeighborsAttrRequest {
                node_id,
                attr_id: attr_id as i32,
                key: key.to_string(),
            }),
        ))?;
        Ok(resp.into_inner().ids)
    }

    fn get_edge_attrs(&mut self, node_id: i64, atype: i64) -> anyhow::Result<Vec<Vec<u8>>> {
        let resp = self.runtime.block_on(self.client.get_edge_attrs(
            Request::new(proto::NodeAtypeRequest { node_id, atype }),
        ))?;
        Ok(resp.into_inner().attrs)
    }

    fn get_nodes(&mut self, attr_id: u32, key: &str) -> anyhow::Result<Vec<i64>> {
        let resp = self
            .runtime
            .block_on(self.client.get_nodes(Request::new(proto::NodeAttrRequest {
                attr_id: attr_id as i32,
                key: key.to_string(),
            })))?;
        Ok(resp.into_inner().ids)
    }

    fn get_nodes2(
        &mut self,
        attr_id1: u32,
        key1: &str,
        attr_id2: u32,
        key2: &str,
    ) -> anyhow::Result<Vec<i64>> {
        let resp = self
            .runtime
            .block_on(self.client.get_nodes2(Request::new(proto::NodeAttr2Request {
                attr_id1: attr_id1 as i32,
                key1: key1.to_string(),
                attr_id2: attr_id2 as i32,
                key2: key2.to_string(),
            })))?;
        Ok(resp.into_inner().ids)
    }

    fn obj_get(&mut self, node_id: i64) -> anyhow::Result<Vec<String>> {
        let resp = self
            .runtime
            .block_on(self.client.obj_get(Request::new(proto::ObjGetRequest {
                node_id,
            })))?;
        Ok(resp
            .into_inner()
            .attrs
            .into_iter()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect())
    }

    fn assoc_range(
        &mut self,
        src: i64,
        atype: i64,
        off: usize,
        len: usize,
    ) -> anyhow::Result<Vec<Assoc>> {
        let resp = self
            .runtime
            .block_on(self.client.assoc_range(Request::new(proto::AssocRangeRequest {
                src,
                atype,
                off: off.try_into().unwrap_or(i32::MAX),
                len: len.try_into().unwrap_or(i32::MAX),
            })))?;
        Ok(resp.into_inner().assocs.into_iter().map(Into::into).collect())
    }

    fn assoc_count(&mut self, src: i64, atype: i64) -> anyhow::Result<i64> {
        let resp = self
            .runtime
            .block_on(self.client.assoc_count(Request::new(proto::AssocCountRequest {
                src,
                atype,
            })))?;
        Ok(resp.into_inner().count)
    }

    fn assoc_get(
        &mut self,
        src: i64,
        atype: i64,
        dst_set: &[i64],
        t_low: i64,
        t_high: i64,
    ) -> anyhow::Result<Vec<Assoc>> {
        let resp = self
            .runtime
            .block_on(self.client.assoc_get(Request::new(proto::AssocGetRequest {
                src,
                atype,
                dst_id_set: dst_set.to_vec(),
                t_low,
                t_high,
            })))?;
        Ok(resp.into_inner().assocs.into_iter().map(Into::into).collect())
    }

    fn assoc_time_range(
        &mut self,
        src: i64,
        atype: i64,
        t_low: i64,
        t_high: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Assoc>> {
        let resp = self.runtime.block_on(self.client.assoc_time_range(
            Request::new(proto::AssocTimeRangeRequest {
                src,
                atype,
                t_low,
                t_high,
                limit: limit.try_into().unwrap_or(i32::MAX),
            }),
        ))?;
        Ok(resp.into_inner().assocs.into_iter().map(Into::into).collect())
    }
}
