//! In-process [`ContainerRuntime`] for tests.
//!
//! `FakeRuntime` never touches a daemon. Containers behave according to a
//! [`FakeBehaviour`] scripted per [`ContainerPrefix`]; everything the
//! runtime is asked to do is recorded so tests can assert on it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use brainns_core::naming::{ContainerName, ContainerPrefix};
use brainns_core::types::DbId;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;

use crate::archive::list_entries;
use crate::error::RuntimeError;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ExitOutcome, LogStream};

/// Exit status reported for a container killed by `stop`.
pub const KILLED_EXIT_CODE: i64 = 137;

/// How a fake container behaves once started.
#[derive(Debug, Clone, Default)]
pub struct FakeBehaviour {
    pub exit_code: i64,
    /// File names written into the first volume's host directory on exit.
    pub outputs: Vec<String>,
    pub logs: Vec<String>,
    /// Keep running until `stop` is called, then exit with 137.
    pub hold_until_stopped: bool,
}

impl FakeBehaviour {
    pub fn succeed_with(outputs: &[&str]) -> Self {
        Self {
            outputs: outputs.iter().map(|o| o.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn exit_with(code: i64) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn hold() -> Self {
        Self {
            hold_until_stopped: true,
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, lines: &[&str]) -> Self {
        self.logs = lines.iter().map(|l| format!("{l}\n")).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Created(String),
    Started(String),
    Exited { name: String, status_code: i64 },
    Stopped { name: String, graceful: bool },
}

/// An archive passed to `copy_in`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    pub container: String,
    pub dest_path: String,
    pub entries: Vec<String>,
}

struct FakeContainer {
    spec: ContainerSpec,
    behaviour: FakeBehaviour,
    stop_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<ContainerPrefix, FakeBehaviour>,
    images: HashSet<String>,
    builds: Vec<String>,
    containers: HashMap<String, FakeContainer>,
    staged: Vec<StagedArchive>,
    events: Vec<RuntimeEvent>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers created with `prefix` behave as `behaviour` from now on.
    pub fn script(&self, prefix: ContainerPrefix, behaviour: FakeBehaviour) {
        self.lock().scripts.insert(prefix, behaviour);
    }

    /// Mark `tag` as already present so `ensure_image` skips the build.
    pub fn with_image(self, tag: &str) -> Self {
        self.lock().images.insert(tag.to_string());
        self
    }

    pub fn builds(&self) -> Vec<String> {
        self.lock().builds.clone()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.lock().events.clone()
    }

    pub fn staged(&self) -> Vec<StagedArchive> {
        self.lock().staged.clone()
    }

    /// Names of containers that still exist, sorted.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().containers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.lock().containers.get(name).map(|c| c.spec.clone())
    }

    /// Names passed to `stop`, in call order.
    pub fn stopped(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::Stopped { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Position of `event` in the event log.
    pub fn position(&self, event: &RuntimeEvent) -> Option<usize> {
        self.lock().events.iter().position(|e| e == event)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // A poisoned lock only happens after a test already panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn write_outputs(spec: &ContainerSpec, outputs: &[String]) -> Result<(), RuntimeError> {
    let Some(volume) = spec.volumes.first() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(&volume.host_path).await?;
    for output in outputs {
        tokio::fs::write(volume.host_path.join(output), b"fake output").await?;
    }
    Ok(())
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, tag: &str, _build_context: &Path) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if state.images.insert(tag.to_string()) {
            state.builds.push(tag.to_string());
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let name = spec.name.to_string();
        let mut state = self.lock();
        if state.containers.contains_key(&name) {
            return Err(RuntimeError::NameConflict(name));
        }
        let behaviour = state
            .scripts
            .get(&spec.name.prefix)
            .cloned()
            .unwrap_or_default();
        let (stop_tx, _) = watch::channel(false);
        state.containers.insert(
            name.clone(),
            FakeContainer {
                spec: spec.clone(),
                behaviour,
                stop_tx,
            },
        );
        state.events.push(RuntimeEvent::Created(name.clone()));
        Ok(ContainerHandle::new(name))
    }

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        archive: Bytes,
        dest_path: &str,
    ) -> Result<(), RuntimeError> {
        let entries = list_entries(&archive)?;
        let mut state = self.lock();
        if !state.containers.contains_key(&handle.name) {
            return Err(RuntimeError::NoSuchContainer(handle.name.clone()));
        }
        state.staged.push(StagedArchive {
            container: handle.name.clone(),
            dest_path: dest_path.to_string(),
            entries,
        });
        Ok(())
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if !state.containers.contains_key(&handle.name) {
            return Err(RuntimeError::NoSuchContainer(handle.name.clone()));
        }
        state.events.push(RuntimeEvent::Started(handle.name.clone()));
        Ok(())
    }

    fn stream_logs(&self, handle: &ContainerHandle) -> LogStream {
        let lines = self
            .lock()
            .containers
            .get(&handle.name)
            .map(|c| c.behaviour.logs.clone())
            .unwrap_or_default();
        futures::stream::iter(lines.into_iter().map(|line| Ok(Bytes::from(line)))).boxed()
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitOutcome, RuntimeError> {
        let (spec, behaviour, mut stopped) = {
            let state = self.lock();
            let container = state
                .containers
                .get(&handle.name)
                .ok_or_else(|| RuntimeError::NoSuchContainer(handle.name.clone()))?;
            (
                container.spec.clone(),
                container.behaviour.clone(),
                container.stop_tx.subscribe(),
            )
        };

        if behaviour.hold_until_stopped {
            // The sender is dropped when the container is removed, which
            // counts as stopped too.
            let _ = stopped.wait_for(|stopped| *stopped).await;
            return Ok(ExitOutcome {
                status_code: KILLED_EXIT_CODE,
            });
        }

        write_outputs(&spec, &behaviour.outputs).await?;

        let mut state = self.lock();
        state.events.push(RuntimeEvent::Exited {
            name: handle.name.clone(),
            status_code: behaviour.exit_code,
        });
        if spec.auto_remove {
            state.containers.remove(&handle.name);
        }
        Ok(ExitOutcome {
            status_code: behaviour.exit_code,
        })
    }

    async fn find_by_name_suffix(
        &self,
        prefixes: &[ContainerPrefix],
        segmentation_id: DbId,
    ) -> Result<Vec<ContainerHandle>, RuntimeError> {
        let mut handles: Vec<_> = self
            .lock()
            .containers
            .keys()
            .filter(|name| ContainerName::matches(name, prefixes, segmentation_id))
            .map(ContainerHandle::new)
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(handles)
    }

    async fn stop(&self, handle: &ContainerHandle, graceful: bool) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let Some(container) = state.containers.remove(&handle.name) else {
            return Ok(());
        };
        container.stop_tx.send_replace(true);
        state.events.push(RuntimeEvent::Stopped {
            name: handle.name.clone(),
            graceful,
        });
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.lock().containers.remove(&handle.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::archive::StagingArchive;
    use crate::runtime::VolumeBinding;

    fn spec(prefix: ContainerPrefix, id: DbId, host: &Path) -> ContainerSpec {
        ContainerSpec {
            image: "nnunet:brainns".into(),
            name: ContainerName::new(prefix, id),
            command: vec![],
            volumes: vec![VolumeBinding::read_write(host, "/app/output")],
            device_requests: vec![],
            user: None,
            auto_remove: true,
        }
    }

    #[tokio::test]
    async fn scripted_container_writes_outputs_and_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        runtime.script(
            ContainerPrefix::NnUnet,
            FakeBehaviour::succeed_with(&["seg_1.nii.gz"]),
        );

        let handle = runtime
            .create(&spec(ContainerPrefix::NnUnet, 1, dir.path()))
            .await
            .unwrap();
        runtime.start(&handle).await.unwrap();
        let outcome = runtime.wait(&handle).await.unwrap();

        assert!(outcome.success());
        assert!(dir.path().join("seg_1.nii.gz").exists());
        assert!(runtime.container_names().is_empty());
    }

    #[tokio::test]
    async fn held_container_exits_when_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.script(ContainerPrefix::Preprocessing, FakeBehaviour::hold());
        let handle = runtime
            .create(&spec(ContainerPrefix::Preprocessing, 4, dir.path()))
            .await
            .unwrap();
        runtime.start(&handle).await.unwrap();

        let waiter = {
            let runtime = runtime.clone();
            let handle = handle.clone();
            tokio::spawn(async move { runtime.wait(&handle).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        runtime.stop(&handle, false).await.unwrap();
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.status_code, KILLED_EXIT_CODE);
        assert_eq!(runtime.stopped(), vec!["preprocessing_container_4"]);
    }

    #[tokio::test]
    async fn suffix_search_is_exact_on_id() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        runtime
            .create(&spec(ContainerPrefix::NnUnet, 11, dir.path()))
            .await
            .unwrap();
        runtime
            .create(&spec(ContainerPrefix::DeepMedic, 1, dir.path()))
            .await
            .unwrap();

        let found = runtime
            .find_by_name_suffix(&ContainerPrefix::ALL, 1)
            .await
            .unwrap();
        assert_eq!(found, vec![ContainerHandle::new("deepmedic_container_1")]);
    }

    #[tokio::test]
    async fn stopping_a_missing_container_is_fine() {
        let runtime = FakeRuntime::new();
        runtime
            .stop(&ContainerHandle::new("model_container_9"), true)
            .await
            .unwrap();
        assert!(runtime.stopped().is_empty());
    }

    #[tokio::test]
    async fn records_staged_entries_and_builds_once() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("1.nii.gz");
        std::fs::write(&input, b"volume").unwrap();
        let runtime = FakeRuntime::new().with_image("preprocessing:brainns");

        runtime
            .ensure_image("preprocessing:brainns", dir.path())
            .await
            .unwrap();
        runtime.ensure_image("synthseg:brainns", dir.path()).await.unwrap();
        runtime.ensure_image("synthseg:brainns", dir.path()).await.unwrap();
        assert_eq!(runtime.builds(), vec!["synthseg:brainns"]);

        let handle = runtime
            .create(&spec(ContainerPrefix::SynthSeg, 2, dir.path()))
            .await
            .unwrap();
        let mut archive = StagingArchive::new();
        archive.add_file(&input, "_0000.nii.gz").unwrap();
        runtime
            .copy_in(&handle, archive.finish().unwrap(), "/app/input")
            .await
            .unwrap();

        let staged = runtime.staged();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].dest_path, "/app/input");
        assert_eq!(staged[0].entries, vec!["_0000.nii.gz"]);
    }

    #[tokio::test]
    async fn copy_into_unknown_container_fails() {
        let runtime = FakeRuntime::new();
        let archive = StagingArchive::new().finish().unwrap();
        assert_matches!(
            runtime
                .copy_in(&ContainerHandle::new("nope"), archive, "/app/input")
                .await,
            Err(RuntimeError::NoSuchContainer(_))
        );
    }
}
