//! Task orchestration.
//!
//! [`TaskService::submit_tasks`] turns caller-owned [`TaskNode`]s into one
//! atomic `SubmitTasks` call:
//!
//! 1. Every node is checked for at least one expected output. A violation
//!    fails the whole batch before any network call.
//! 2. Inline dependency content of each node is created as new blobs, in one
//!    metadata call and one upload stream per node. The new ids follow the
//!    node's existing dependencies, in key order of the content map.
//! 3. All resolved tasks are submitted in a single request.
//! 4. One [`TaskInfos`] is returned per node, in input order.
//!
//! Nodes are consumed, never mutated. Resolution produces separate records.
//!
//! Dependency blobs created before a failed submission are not deleted. Their
//! ids are logged at `warn`.

use super::{blobs::BlobService, unary};
use crate::{metrics, pool::ChannelPool};
use gridlink_core::{
    BlobInfo, Error, Result, SessionInfo, TaskConfiguration, TaskInfos, TaskNode,
    proto::{
        SubmitTasksRequest, TaskOptions, submit_tasks_request::TaskCreation,
        submit_tasks_response::TaskInfo, tasks_client::TasksClient,
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct TaskService {
    pool: Arc<ChannelPool>,
    blobs: BlobService,
}

/// A node whose dependencies are all blob ids.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedTask {
    payload_id: String,
    expected_outputs: Vec<String>,
    data_dependencies: Vec<String>,
    task_options: Option<TaskOptions>,
}

impl ResolvedTask {
    fn new(node: &TaskNode, created: &[BlobInfo]) -> Self {
        Self {
            payload_id: node.payload.blob_id().to_string(),
            expected_outputs: node
                .expected_outputs
                .iter()
                .map(|b| b.blob_id().to_string())
                .collect(),
            data_dependencies: node
                .data_dependencies
                .iter()
                .chain(created)
                .map(|b| b.blob_id().to_string())
                .collect(),
            task_options: node.task_options.as_ref().map(TaskOptions::from),
        }
    }

    fn to_wire(&self) -> TaskCreation {
        TaskCreation {
            payload_id: self.payload_id.clone(),
            expected_output_keys: self.expected_outputs.clone(),
            data_dependencies: self.data_dependencies.clone(),
            task_options: self.task_options.clone(),
        }
    }
}

impl TaskService {
    pub fn new(pool: Arc<ChannelPool>, blobs: BlobService) -> Self {
        Self { pool, blobs }
    }

    /// Submits `tasks` as one batch under `session`.
    ///
    /// `options` applies to every task that carries no options of its own;
    /// when `None`, the session defaults apply.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSubmission`] if any task has no expected output.
    ///   Nothing is sent.
    /// - Any blob creation or upload error while resolving inline content.
    /// - [`Error::Rpc`] if the submission call fails. No task is submitted.
    /// - [`Error::UnexpectedResponse`] if the server does not answer with
    ///   one task per submitted node, in order.
    #[tracing::instrument(skip_all, fields(session_id = session.session_id(), tasks = tasks.len()))]
    pub async fn submit_tasks(
        &self,
        session: &SessionInfo,
        tasks: Vec<TaskNode>,
        options: Option<&TaskConfiguration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskInfos>> {
        validate(&tasks)?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let mut orphans: Vec<String> = Vec::new();
        let resolved = match self.resolve(session, &tasks, &mut orphans, cancel).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn_orphans(&orphans);
                return Err(err);
            }
        };

        match self.submit(session, &resolved, options, cancel).await {
            Ok(infos) => {
                metrics::increment_tasks_submitted(infos.len() as u64);
                Ok(infos)
            }
            Err(err) => {
                warn_orphans(&orphans);
                Err(err)
            }
        }
    }

    async fn resolve(
        &self,
        session: &SessionInfo,
        tasks: &[TaskNode],
        created_ids: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedTask>> {
        let mut resolved = Vec::with_capacity(tasks.len());
        for node in tasks {
            let mut created = Vec::new();
            if !node.data_dependencies_content.is_empty() {
                let contents = node
                    .data_dependencies_content
                    .iter()
                    .map(|(name, content)| (name.clone(), content.clone()));
                let outcome = self
                    .blobs
                    .create_blobs_batched_recording(session, contents, &mut created, cancel)
                    .await;
                // Recorded before `?` so blobs left without content are reported too.
                created_ids.extend(created.iter().map(|b| b.blob_id().to_string()));
                outcome?;
            }
            resolved.push(ResolvedTask::new(node, &created));
        }
        Ok(resolved)
    }

    async fn submit(
        &self,
        session: &SessionInfo,
        resolved: &[ResolvedTask],
        options: Option<&TaskConfiguration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskInfos>> {
        let request = SubmitTasksRequest {
            session_id: session.session_id().to_string(),
            task_options: options.map(TaskOptions::from),
            task_creations: resolved.iter().map(ResolvedTask::to_wire).collect(),
        };

        let lease = self.pool.acquire(cancel).await?;
        let mut client = TasksClient::new(lease.channel());
        let response = unary("SubmitTasks", cancel, client.submit_tasks(request)).await?;

        pair_infos(resolved, response.task_infos)
    }
}

fn validate(tasks: &[TaskNode]) -> Result<()> {
    for (index, node) in tasks.iter().enumerate() {
        if node.expected_outputs.is_empty() {
            return Err(Error::InvalidSubmission {
                reason: format!(
                    "task {index} (payload {}) has no expected outputs",
                    node.payload.blob_id()
                ),
            });
        }
    }
    Ok(())
}

/// Matches server task ids to the submitted tasks, by position.
fn pair_infos(resolved: &[ResolvedTask], infos: Vec<TaskInfo>) -> Result<Vec<TaskInfos>> {
    if infos.len() != resolved.len() {
        return Err(Error::UnexpectedResponse {
            method: "SubmitTasks",
            reason: format!("submitted {} tasks, got {}", resolved.len(), infos.len()),
        });
    }

    resolved
        .iter()
        .zip(infos)
        .map(|(task, info)| {
            if !info.payload_id.is_empty() && info.payload_id != task.payload_id {
                return Err(Error::UnexpectedResponse {
                    method: "SubmitTasks",
                    reason: format!(
                        "task {} answered for payload {}, expected {}",
                        info.task_id, info.payload_id, task.payload_id
                    ),
                });
            }
            Ok(TaskInfos {
                task_id: info.task_id,
                payload_id: task.payload_id.clone(),
                expected_outputs: task.expected_outputs.clone(),
                data_dependencies: task.data_dependencies.clone(),
            })
        })
        .collect()
}

fn warn_orphans(orphans: &[String]) {
    if !orphans.is_empty() {
        tracing::warn!(
            orphaned_blobs = ?orphans,
            "Submission failed after creating dependency blobs; they are not deleted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn blob(id: &str) -> BlobInfo {
        BlobInfo::new(id, id, "session")
    }

    fn info(task_id: &str, payload_id: &str) -> TaskInfo {
        TaskInfo {
            task_id: task_id.to_string(),
            expected_output_ids: Vec::new(),
            data_dependencies: Vec::new(),
            payload_id: payload_id.to_string(),
        }
    }

    #[test]
    fn validation_rejects_missing_outputs_anywhere_in_batch() {
        let tasks = vec![
            TaskNode::new(blob("p1"), vec![blob("o1")]),
            TaskNode::new(blob("p2"), Vec::new()),
        ];
        let err = validate(&tasks).unwrap_err();
        assert!(matches!(err, Error::InvalidSubmission { .. }));
        assert!(err.to_string().contains("p2"));
    }

    #[test]
    fn resolution_appends_created_ids_after_existing_dependencies() {
        let node = TaskNode::new(blob("p"), vec![blob("o")])
            .with_data_dependency(blob("existing"))
            .with_dependency_content("inline", Bytes::from_static(b"x"));

        let resolved = ResolvedTask::new(&node, &[blob("created")]);
        assert_eq!(resolved.data_dependencies, ["existing", "created"]);
        assert_eq!(resolved.expected_outputs, ["o"]);
        // The node itself is left as the caller built it.
        assert_eq!(node.data_dependencies, [blob("existing")]);
    }

    #[test]
    fn resolution_is_deterministic() {
        let node = TaskNode::new(blob("p"), vec![blob("o")])
            .with_dependency_content("inline", Bytes::from_static(b"x"));

        let first = ResolvedTask::new(&node, &[blob("created")]);
        assert_eq!(first, ResolvedTask::new(&node, &[blob("created")]));
        assert_ne!(first, ResolvedTask::new(&node, &[]));
    }

    #[test]
    fn pairing_keeps_input_order() {
        let resolved = [
            ResolvedTask::new(&TaskNode::new(blob("p1"), vec![blob("o1")]), &[]),
            ResolvedTask::new(&TaskNode::new(blob("p2"), vec![blob("o2")]), &[]),
        ];
        let infos = pair_infos(&resolved, vec![info("t1", "p1"), info("t2", "")]).unwrap();

        assert_eq!(infos[0].task_id, "t1");
        assert_eq!(infos[0].payload_id, "p1");
        assert_eq!(infos[0].expected_outputs, ["o1"]);
        assert_eq!(infos[1].task_id, "t2");
        assert_eq!(infos[1].payload_id, "p2");
        assert_eq!(infos[1].expected_outputs, ["o2"]);
    }

    #[test]
    fn pairing_rejects_count_or_payload_mismatch() {
        let resolved = [ResolvedTask::new(
            &TaskNode::new(blob("p1"), vec![blob("o1")]),
            &[],
        )];
        assert!(matches!(
            pair_infos(&resolved, Vec::new()),
            Err(Error::UnexpectedResponse { .. })
        ));
        assert!(matches!(
            pair_infos(&resolved, vec![info("t1", "other")]),
            Err(Error::UnexpectedResponse { .. })
        ));
    }
}
