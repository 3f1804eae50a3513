//! Shared test app for API integration tests.
//!
//! The app runs on the in-memory queue and store with a fake container
//! runtime, so no database or Docker daemon is needed.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use brainns_core::job_payload::FileFormat;
use brainns_core::model_registry::ModelRegistry;
use brainns_core::sequence::{SequenceIds, SequenceKind};
use brainns_db::models::project::Project;
use brainns_docker::testing::FakeRuntime;
use brainns_pipeline::queue::MemoryJobQueue;
use brainns_pipeline::store::MemoryStore;
use brainns_pipeline::{status_channel, Backends, Coordinator, PipelineConfig, Reaper};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use brainns_api::config::ServerConfig;
use brainns_api::router::build_app_router;
use brainns_api::state::AppState;

const REGISTRY: &str = r#"{
  "models": [
    {
      "id": "nnunet-brats",
      "image": "nnunet:brainns",
      "dockerfile_path": "/opt/models/nnunet",
      "necessary_sequences": ["flair", "t1", "t1km", "t2"],
      "uses_gpu": true,
      "output_path": "/app/output",
      "container_prefix": "nn_unet"
    }
  ]
}"#;

pub struct TestApp {
    pub root: TempDir,
    pub config: ServerConfig,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub runtime: Arc<FakeRuntime>,
    state: AppState,
}

/// Build a test `ServerConfig` rooted at `storage_root`.
pub fn test_config(storage_root: &std::path::Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        docker_socket: None,
        pipeline: PipelineConfig::for_root(storage_root),
    }
}

pub fn test_app() -> TestApp {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let runtime = Arc::new(FakeRuntime::new());
    let registry = Arc::new(ModelRegistry::from_json(REGISTRY).unwrap());
    // Events are not applied in API tests.
    let (notifier, _events) = status_channel();

    let backends = Backends {
        queue: queue.clone(),
        store: store.clone(),
        pool: None,
    };
    let state = AppState {
        coordinator: Coordinator::new(
            backends.queue.clone(),
            backends.store.clone(),
            registry,
            &config.pipeline,
        ),
        reaper: Reaper::new(
            backends.queue.clone(),
            backends.store.clone(),
            runtime.clone(),
            notifier,
            &config.pipeline,
        ),
        backends,
        config: Arc::new(config.clone()),
    };

    TestApp {
        root,
        config,
        store,
        queue,
        runtime,
        state,
    }
}

impl TestApp {
    /// A fresh router over the shared state.
    pub fn router(&self) -> Router {
        build_app_router(self.state.clone(), &self.config)
    }

    pub fn project(&self) -> Project {
        self.store.add_project("glioma-study", FileFormat::Nifti)
    }

    /// Upload all four sequences to `project`, raw volumes included.
    pub fn upload_all(&self, project: &Project) -> SequenceIds {
        let mut ids = SequenceIds::default();
        for kind in SequenceKind::ALL {
            let sequence = self.store.add_sequence(project.id, kind.as_str());
            let sequence_ref = sequence.to_ref();
            let dir = self
                .config
                .pipeline
                .storage
                .raw_sequence_dir(project.id, &sequence_ref.dir_name());
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(sequence_ref.nifti_file_name()), b"nifti").unwrap();
            ids.set(kind, sequence.id);
        }
        ids
    }

    pub fn submit_body(&self, project: &Project, sequences: SequenceIds) -> serde_json::Value {
        serde_json::json!({
            "project_id": project.id,
            "name": "tumour",
            "model": "nnunet-brats",
            "t1": sequences.t1,
            "t1km": sequences.t1km,
            "t2": sequences.t2,
            "flair": sequences.flair,
        })
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        send(self.router(), Method::GET, uri, Body::empty()).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        send(self.router(), Method::DELETE, uri, Body::empty()).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        send(
            self.router(),
            Method::POST,
            uri,
            Body::from(serde_json::to_vec(&body).unwrap()),
        )
        .await
    }
}

async fn send(app: Router, method: Method, uri: &str, body: Body) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
