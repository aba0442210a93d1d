//! # Domain Types
//!
//! Types exchanged between callers and the client services, and their
//! conversions to and from the generated wire messages in [`crate::proto`].
//!
//! ## Overview
//!
//! - [`SessionInfo`] - opaque scope for blobs and tasks.
//! - [`BlobInfo`] - immutable `(name, blob_id, session_id)` triple assigned by
//!   the server.
//! - [`BlobState`] - read-only snapshot of a blob, never cached.
//! - [`TaskNode`] - caller-side task description, possibly carrying inline
//!   dependency content to be turned into blobs before submission.
//! - [`TaskInfos`] - per-task submission result.
//! - [`ServiceConfiguration`] - server-reported transport limits.
//! - [`TaskConfiguration`] - task options (retries, priority, partition).

use crate::{Error, proto};
use bytes::Bytes;
use core::fmt;
use core::num::NonZeroUsize;
use core::time::Duration;
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier scoping all blobs and tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionInfo {
    session_id: String,
}

impl SessionInfo {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.session_id)
    }
}

/// Identifies one addressable unit of data within a session.
///
/// Identifiers are assigned by the remote service on creation and never change
/// afterwards, so the fields are read-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobInfo {
    name: String,
    blob_id: String,
    session_id: String,
}

impl BlobInfo {
    pub fn new(
        name: impl Into<String>,
        blob_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            blob_id: blob_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blob_id(&self) -> &str {
        &self.blob_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl From<&BlobInfo> for proto::ResultIdentifier {
    fn from(blob: &BlobInfo) -> Self {
        Self {
            session_id: blob.session_id.clone(),
            result_id: blob.blob_id.clone(),
        }
    }
}

impl From<proto::ResultRaw> for BlobInfo {
    fn from(raw: proto::ResultRaw) -> Self {
        Self {
            name: raw.name,
            blob_id: raw.result_id,
            session_id: raw.session_id,
        }
    }
}

/// Lifecycle state of a blob as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobStatus {
    Unspecified,
    Created,
    Completed,
    Aborted,
    Deleted,
    NotFound,
}

impl BlobStatus {
    /// Completed and aborted blobs never change state again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl From<proto::ResultStatus> for BlobStatus {
    fn from(status: proto::ResultStatus) -> Self {
        match status {
            proto::ResultStatus::Unspecified => Self::Unspecified,
            proto::ResultStatus::Created => Self::Created,
            proto::ResultStatus::Completed => Self::Completed,
            proto::ResultStatus::Aborted => Self::Aborted,
            proto::ResultStatus::Deleted => Self::Deleted,
            proto::ResultStatus::Notfound => Self::NotFound,
        }
    }
}

impl From<BlobStatus> for proto::ResultStatus {
    fn from(status: BlobStatus) -> Self {
        match status {
            BlobStatus::Unspecified => Self::Unspecified,
            BlobStatus::Created => Self::Created,
            BlobStatus::Completed => Self::Completed,
            BlobStatus::Aborted => Self::Aborted,
            BlobStatus::Deleted => Self::Deleted,
            BlobStatus::NotFound => Self::Notfound,
        }
    }
}

/// Point-in-time snapshot of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobState {
    pub blob_id: String,
    pub session_id: String,
    pub name: String,
    pub status: BlobStatus,
    pub created_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
}

impl From<proto::ResultRaw> for BlobState {
    fn from(raw: proto::ResultRaw) -> Self {
        Self {
            status: raw.status().into(),
            created_at: from_unix_millis(raw.created_at_ms),
            completed_at: from_unix_millis(raw.completed_at_ms),
            blob_id: raw.result_id,
            session_id: raw.session_id,
            name: raw.name,
        }
    }
}

/// Zero and negative values mean the timestamp was never set.
fn from_unix_millis(millis: i64) -> Option<SystemTime> {
    u64::try_from(millis)
        .ok()
        .filter(|&ms| ms > 0)
        .map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlobSortField {
    #[default]
    CreatedAt,
    CompletedAt,
    Name,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobSort {
    pub field: BlobSortField,
    pub direction: SortDirection,
}

/// Filters applied server-side when listing blobs. Unset fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobFilter {
    pub session_id: Option<String>,
    pub status: Option<BlobStatus>,
    pub name: Option<String>,
}

/// Page, sort and filter specification for listing blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPagination {
    pub page: i32,
    pub page_size: i32,
    pub sort: BlobSort,
    pub filter: BlobFilter,
}

impl Default for BlobPagination {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 50,
            sort: BlobSort::default(),
            filter: BlobFilter::default(),
        }
    }
}

impl From<&BlobPagination> for proto::ListResultsRequest {
    fn from(pagination: &BlobPagination) -> Self {
        let field = match pagination.sort.field {
            BlobSortField::CreatedAt => proto::ResultSortField::CreatedAt,
            BlobSortField::CompletedAt => proto::ResultSortField::CompletedAt,
            BlobSortField::Name => proto::ResultSortField::Name,
            BlobSortField::Status => proto::ResultSortField::Status,
        };
        let direction = match pagination.sort.direction {
            SortDirection::Ascending => proto::SortDirection::Asc,
            SortDirection::Descending => proto::SortDirection::Desc,
        };
        let filter = &pagination.filter;
        Self {
            page: pagination.page,
            page_size: pagination.page_size,
            filters: Some(proto::list_results_request::Filters {
                session_id: filter.session_id.clone().unwrap_or_default(),
                status: filter
                    .status
                    .map_or(proto::ResultStatus::Unspecified, Into::into)
                    .into(),
                name: filter.name.clone().unwrap_or_default(),
            }),
            sort: Some(proto::list_results_request::Sort {
                field: field.into(),
                direction: direction.into(),
            }),
        }
    }
}

/// Execution options attached to a session or to individual tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfiguration {
    pub max_retries: i32,
    pub priority: i32,
    pub partition_id: String,
    pub max_duration: Duration,
    pub options: HashMap<String, String>,
}

impl Default for TaskConfiguration {
    fn default() -> Self {
        Self {
            max_retries: 2,
            priority: 1,
            partition_id: String::new(),
            max_duration: Duration::from_secs(3600),
            options: HashMap::new(),
        }
    }
}

impl From<&TaskConfiguration> for proto::TaskOptions {
    fn from(config: &TaskConfiguration) -> Self {
        Self {
            options: config.options.clone(),
            max_duration_ms: i64::try_from(config.max_duration.as_millis()).unwrap_or(i64::MAX),
            max_retries: config.max_retries,
            priority: config.priority,
            partition_id: config.partition_id.clone(),
        }
    }
}

/// Caller-side description of one task to submit.
///
/// `data_dependencies_content` holds inline dependency content keyed by blob
/// name. At submission each entry becomes a new blob whose id is appended,
/// in key order, after the ids already listed in `data_dependencies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub payload: BlobInfo,
    pub expected_outputs: Vec<BlobInfo>,
    pub data_dependencies: Vec<BlobInfo>,
    pub data_dependencies_content: BTreeMap<String, Bytes>,
    pub task_options: Option<TaskConfiguration>,
}

impl TaskNode {
    pub fn new(payload: BlobInfo, expected_outputs: Vec<BlobInfo>) -> Self {
        Self {
            payload,
            expected_outputs,
            data_dependencies: Vec::new(),
            data_dependencies_content: BTreeMap::new(),
            task_options: None,
        }
    }

    /// Adds an existing blob as a data dependency.
    #[must_use]
    pub fn with_data_dependency(mut self, blob: BlobInfo) -> Self {
        self.data_dependencies.push(blob);
        self
    }

    /// Adds inline dependency content, uploaded as a blob named `name`.
    #[must_use]
    pub fn with_dependency_content(mut self, name: impl Into<String>, content: Bytes) -> Self {
        self.data_dependencies_content.insert(name.into(), content);
        self
    }

    #[must_use]
    pub fn with_task_options(mut self, options: TaskConfiguration) -> Self {
        self.task_options = Some(options);
        self
    }
}

/// Submission result for one task, in the order tasks were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfos {
    pub task_id: String,
    pub payload_id: String,
    pub expected_outputs: Vec<String>,
    pub data_dependencies: Vec<String>,
}

/// Transport limits reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfiguration {
    pub data_chunk_max_size: NonZeroUsize,
}

impl TryFrom<proto::ResultsServiceConfigurationResponse> for ServiceConfiguration {
    type Error = Error;

    fn try_from(resp: proto::ResultsServiceConfigurationResponse) -> Result<Self, Self::Error> {
        usize::try_from(resp.data_chunk_max_size)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(|data_chunk_max_size| Self {
                data_chunk_max_size,
            })
            .ok_or_else(|| Error::ConfigurationUnavailable {
                reason: format!(
                    "invalid data_chunk_max_size {}",
                    resp.data_chunk_max_size
                ),
            })
    }
}
