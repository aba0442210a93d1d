//! In-process mock of the task cluster.
//!
//! Serves `Results`, `Tasks`, `Sessions` and `Events` on `127.0.0.1:0`,
//! counts calls per rpc, records every upload frame and rejects frames larger
//! than the advertised chunk limit.
#![allow(dead_code)]

use bytes::Bytes;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use futures::{Stream, stream};
use gridlink_client::{
    ClientConfig, GridClient,
    proto::{
        CreateResultsMetaDataRequest, CreateResultsMetaDataResponse, CreateResultsRequest,
        CreateResultsResponse, CreateSessionRequest, CreateSessionResponse,
        DownloadResultDataRequest, DownloadResultDataResponse, EventSubscriptionRequest,
        EventSubscriptionResponse, GetResultRequest, GetResultResponse, ListResultsRequest,
        ListResultsResponse, ResultIdentifier, ResultRaw, ResultStatus,
        ResultsServiceConfigurationRequest, ResultsServiceConfigurationResponse,
        SubmitTasksRequest, SubmitTasksResponse, UploadResultDataRequest,
        UploadResultDataResponse,
        events_server::{Events, EventsServer},
        results_server::{Results, ResultsServer},
        sessions_server::{Sessions, SessionsServer},
        submit_tasks_response::TaskInfo,
        tasks_server::{Tasks, TasksServer},
    },
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming, transport::Server};

#[derive(Default)]
pub struct Calls {
    pub create_results_meta_data: AtomicUsize,
    pub create_results: AtomicUsize,
    pub upload_result_data: AtomicUsize,
    pub download_result_data: AtomicUsize,
    pub get_result: AtomicUsize,
    pub list_results: AtomicUsize,
    pub get_service_configuration: AtomicUsize,
    pub submit_tasks: AtomicUsize,
    pub create_session: AtomicUsize,
    pub get_events: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        [
            &self.create_results_meta_data,
            &self.create_results,
            &self.upload_result_data,
            &self.download_result_data,
            &self.get_result,
            &self.list_results,
            &self.get_service_configuration,
            &self.submit_tasks,
            &self.create_session,
            &self.get_events,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// One upload frame as received.
#[derive(Debug, Clone)]
pub struct Frame {
    pub result_id: String,
    pub data: Bytes,
}

struct StoredBlob {
    raw: ResultRaw,
    data: Vec<u8>,
}

pub struct State {
    pub calls: Calls,
    chunk_max: usize,
    next_id: AtomicUsize,
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    frames: Mutex<Vec<Frame>>,
    submissions: Mutex<Vec<SubmitTasksRequest>>,
    sessions: Mutex<Vec<CreateSessionRequest>>,
    pub fail_upload: AtomicBool,
    pub fail_submit: AtomicBool,
    pub fail_config: AtomicBool,
    events: broadcast::Sender<EventSubscriptionResponse>,
}

impl State {
    fn new(chunk_max: usize) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            calls: Calls::default(),
            chunk_max,
            next_id: AtomicUsize::new(1),
            blobs: Mutex::new(BTreeMap::new()),
            frames: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            fail_upload: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
            fail_config: AtomicBool::new(false),
            events,
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn register(&self, session_id: &str, names: impl IntoIterator<Item = String>) -> Vec<ResultRaw> {
        let mut blobs = self.blobs.lock().unwrap();
        names
            .into_iter()
            .map(|name| {
                let raw = ResultRaw {
                    session_id: session_id.to_string(),
                    name,
                    result_id: self.next_id("blob"),
                    status: ResultStatus::Created.into(),
                    created_at_ms: 1_700_000_000_000,
                    completed_at_ms: 0,
                };
                blobs.insert(
                    raw.result_id.clone(),
                    StoredBlob {
                        raw: raw.clone(),
                        data: Vec::new(),
                    },
                );
                raw
            })
            .collect()
    }

    fn transition(&self, blob_id: &str, status: ResultStatus, data: Option<&[u8]>) {
        let event = {
            let mut blobs = self.blobs.lock().unwrap();
            let Some(blob) = blobs.get_mut(blob_id) else {
                return;
            };
            if let Some(data) = data {
                blob.data = data.to_vec();
            }
            blob.raw.status = status.into();
            if status == ResultStatus::Completed {
                blob.raw.completed_at_ms = 1_700_000_001_000;
            }
            EventSubscriptionResponse {
                session_id: blob.raw.session_id.clone(),
                result_id: blob_id.to_string(),
                status: status.into(),
            }
        };
        let _ = self.events.send(event);
    }

    /// Marks a blob completed with `data`, as a worker would.
    pub fn complete(&self, blob_id: &str, data: &[u8]) {
        self.transition(blob_id, ResultStatus::Completed, Some(data));
    }

    pub fn abort(&self, blob_id: &str) {
        self.transition(blob_id, ResultStatus::Aborted, None);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<SubmitTasksRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<CreateSessionRequest> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn data(&self, blob_id: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(blob_id).map(|b| b.data.clone())
    }

    pub fn status(&self, blob_id: &str) -> Option<ResultStatus> {
        self.blobs
            .lock()
            .unwrap()
            .get(blob_id)
            .map(|b| b.raw.status())
    }
}

#[derive(Clone)]
struct MockService(Arc<State>);

type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[tonic::async_trait]
impl Results for MockService {
    async fn create_results_meta_data(
        &self,
        request: Request<CreateResultsMetaDataRequest>,
    ) -> Result<Response<CreateResultsMetaDataResponse>, Status> {
        self.0.calls.create_results_meta_data.fetch_add(1, Ordering::SeqCst);
        let req = request.into_inner();
        let results = self
            .0
            .register(&req.session_id, req.results.into_iter().map(|r| r.name));
        Ok(Response::new(CreateResultsMetaDataResponse { results }))
    }

    async fn create_results(
        &self,
        request: Request<CreateResultsRequest>,
    ) -> Result<Response<CreateResultsResponse>, Status> {
        self.0.calls.create_results.fetch_add(1, Ordering::SeqCst);
        let req = request.into_inner();
        let results = self
            .0
            .register(&req.session_id, req.results.into_iter().map(|r| r.name));
        Ok(Response::new(CreateResultsResponse { results }))
    }

    async fn upload_result_data(
        &self,
        request: Request<Streaming<UploadResultDataRequest>>,
    ) -> Result<Response<UploadResultDataResponse>, Status> {
        self.0.calls.upload_result_data.fetch_add(1, Ordering::SeqCst);
        let mut frames = request.into_inner();
        let mut written: Vec<ResultIdentifier> = Vec::new();
        let mut staged: HashMap<String, Vec<u8>> = HashMap::new();

        while let Some(frame) = frames.message().await? {
            if self.0.fail_upload.load(Ordering::SeqCst) {
                return Err(Status::data_loss("storage unavailable"));
            }
            if frame.data_chunk.len() > self.0.chunk_max {
                return Err(Status::invalid_argument(format!(
                    "frame of {} bytes exceeds {}",
                    frame.data_chunk.len(),
                    self.0.chunk_max
                )));
            }
            let id = frame
                .id
                .ok_or_else(|| Status::invalid_argument("frame without result id"))?;
            if !self.0.blobs.lock().unwrap().contains_key(&id.result_id) {
                return Err(Status::not_found(id.result_id));
            }

            self.0.frames.lock().unwrap().push(Frame {
                result_id: id.result_id.clone(),
                data: frame.data_chunk.clone(),
            });
            staged
                .entry(id.result_id.clone())
                .or_default()
                .extend_from_slice(&frame.data_chunk);
            if !written.contains(&id) {
                written.push(id);
            }
        }

        // Only a cleanly finished stream stores anything.
        for id in &written {
            let data = staged.remove(&id.result_id).unwrap_or_default();
            self.0.complete(&id.result_id, &data);
        }
        Ok(Response::new(UploadResultDataResponse { results: written }))
    }

    type DownloadResultDataStream = BoxStream<DownloadResultDataResponse>;

    async fn download_result_data(
        &self,
        request: Request<DownloadResultDataRequest>,
    ) -> Result<Response<Self::DownloadResultDataStream>, Status> {
        self.0.calls.download_result_data.fetch_add(1, Ordering::SeqCst);
        let req = request.into_inner();
        let data = self
            .0
            .data(&req.result_id)
            .ok_or_else(|| Status::not_found(req.result_id.clone()))?;

        let frames: Vec<Result<DownloadResultDataResponse, Status>> = data
            .chunks(self.0.chunk_max)
            .map(|c| {
                Ok(DownloadResultDataResponse {
                    data_chunk: Bytes::copy_from_slice(c),
                })
            })
            .collect();
        Ok(Response::new(Box::pin(stream::iter(frames))))
    }

    async fn get_result(
        &self,
        request: Request<GetResultRequest>,
    ) -> Result<Response<GetResultResponse>, Status> {
        self.0.calls.get_result.fetch_add(1, Ordering::SeqCst);
        let id = request.into_inner().result_id;
        let raw = self
            .0
            .blobs
            .lock()
            .unwrap()
            .get(&id)
            .map(|b| b.raw.clone())
            .ok_or_else(|| Status::not_found(id))?;
        Ok(Response::new(GetResultResponse { result: Some(raw) }))
    }

    async fn list_results(
        &self,
        request: Request<ListResultsRequest>,
    ) -> Result<Response<ListResultsResponse>, Status> {
        self.0.calls.list_results.fetch_add(1, Ordering::SeqCst);
        let req = request.into_inner();
        let filters = req.filters.unwrap_or_default();

        let mut matching: Vec<ResultRaw> = self
            .0
            .blobs
            .lock()
            .unwrap()
            .values()
            .map(|b| b.raw.clone())
            .filter(|r| filters.session_id.is_empty() || r.session_id == filters.session_id)
            .filter(|r| filters.name.is_empty() || r.name == filters.name)
            .filter(|r| {
                filters.status() == ResultStatus::Unspecified || r.status() == filters.status()
            })
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));

        let total = matching.len() as i32;
        let page_size = req.page_size.max(1) as usize;
        let results = matching
            .into_iter()
            .skip(req.page.max(0) as usize * page_size)
            .take(page_size)
            .collect();
        Ok(Response::new(ListResultsResponse {
            results,
            page: req.page,
            page_size: req.page_size,
            total,
        }))
    }

    async fn get_service_configuration(
        &self,
        _request: Request<ResultsServiceConfigurationRequest>,
    ) -> Result<Response<ResultsServiceConfigurationResponse>, Status> {
        self.0.calls.get_service_configuration.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_config.load(Ordering::SeqCst) {
            return Err(Status::unavailable("configuration store offline"));
        }
        Ok(Response::new(ResultsServiceConfigurationResponse {
            data_chunk_max_size: self.0.chunk_max as i32,
        }))
    }
}

#[tonic::async_trait]
impl Tasks for MockService {
    async fn submit_tasks(
        &self,
        request: Request<SubmitTasksRequest>,
    ) -> Result<Response<SubmitTasksResponse>, Status> {
        self.0.calls.submit_tasks.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_submit.load(Ordering::SeqCst) {
            return Err(Status::internal("scheduler rejected the batch"));
        }
        let req = request.into_inner();
        self.0.submissions.lock().unwrap().push(req.clone());

        let task_infos = req
            .task_creations
            .into_iter()
            .map(|t| TaskInfo {
                task_id: self.0.next_id("task"),
                expected_output_ids: t.expected_output_keys,
                data_dependencies: t.data_dependencies,
                payload_id: t.payload_id,
            })
            .collect();
        Ok(Response::new(SubmitTasksResponse { task_infos }))
    }
}

#[tonic::async_trait]
impl Sessions for MockService {
    async fn create_session(
        &self,
        request: Request<CreateSessionRequest>,
    ) -> Result<Response<CreateSessionResponse>, Status> {
        self.0.calls.create_session.fetch_add(1, Ordering::SeqCst);
        self.0.sessions.lock().unwrap().push(request.into_inner());
        Ok(Response::new(CreateSessionResponse {
            session_id: self.0.next_id("session"),
        }))
    }
}

#[tonic::async_trait]
impl Events for MockService {
    type GetEventsStream = BoxStream<EventSubscriptionResponse>;

    async fn get_events(
        &self,
        request: Request<EventSubscriptionRequest>,
    ) -> Result<Response<Self::GetEventsStream>, Status> {
        self.0.calls.get_events.fetch_add(1, Ordering::SeqCst);
        let req = request.into_inner();

        // Subscribe before the snapshot so no transition falls in between.
        let mut updates = self.0.events.subscribe();
        let snapshot: Vec<EventSubscriptionResponse> = req
            .result_ids
            .iter()
            .filter_map(|id| {
                self.0.status(id).map(|status| EventSubscriptionResponse {
                    session_id: req.session_id.clone(),
                    result_id: id.clone(),
                    status: status.into(),
                })
            })
            .collect();

        let (tx, rx) = mpsc::channel::<Result<EventSubscriptionResponse, Status>>(16);
        tokio::spawn(async move {
            for event in snapshot {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            loop {
                let event = tokio::select! {
                    () = tx.closed() => return,
                    event = updates.recv() => match event {
                        Ok(event) => event,
                        Err(_) => return,
                    },
                };
                let wanted = event.session_id == req.session_id
                    && req.result_ids.contains(&event.result_id);
                if wanted && tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// A running mock cluster. Stops serving when dropped.
pub struct MockCluster {
    pub state: Arc<State>,
    pub endpoint: String,
    shutdown: CancellationToken,
}

impl MockCluster {
    pub async fn start(chunk_max: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::new(chunk_max));
        let shutdown = CancellationToken::new();

        let service = MockService(Arc::clone(&state));
        let signal = shutdown.clone().cancelled_owned();
        tokio::spawn(async move {
            Server::builder()
                .add_service(ResultsServer::new(service.clone()))
                .add_service(TasksServer::new(service.clone()))
                .add_service(SessionsServer::new(service.clone()))
                .add_service(EventsServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await
                .unwrap();
        });

        Self {
            state,
            endpoint: format!("http://{addr}"),
            shutdown,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.endpoint.clone())
    }

    pub fn client(&self) -> GridClient {
        GridClient::connect_lazy(&self.config()).unwrap()
    }

    pub fn calls(&self) -> &Calls {
        &self.state.calls
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Deterministic test content of `len` bytes.
pub fn content(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
}
