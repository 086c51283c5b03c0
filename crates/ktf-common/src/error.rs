//! Error types for ktf
//!
//! Errors are structured with fields naming the cluster, addon, namespace or
//! operation involved, so a failed test run can be diagnosed from the error
//! chain alone.

use thiserror::Error;

use crate::context::ContextError;

/// Main error type for ktf operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that has no more specific classification
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Missing or invalid builder configuration; raised before any network call
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// The referenced object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g., "Namespace")
        kind: String,
        /// Resource name, namespace-qualified when namespaced
        name: String,
    },

    /// The object being created already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// Optimistic-concurrency conflict (stale resourceVersion)
    #[error("conflict updating {kind} {name}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// An addon with the same name is already deployed to the cluster
    #[error("addon {addon} is already registered on cluster {cluster}")]
    AlreadyRegistered {
        /// Addon name
        addon: String,
        /// Cluster name
        cluster: String,
    },

    /// A declared dependency is not deployed to the cluster
    #[error("addon {addon} depends on {dependency}, which is not deployed to cluster {cluster}")]
    DependencyNotFound {
        /// Dependent addon
        addon: String,
        /// Missing dependency
        dependency: String,
        /// Cluster name
        cluster: String,
    },

    /// A declared dependency did not become ready before the context ended
    #[error(
        "addon {addon} gave up waiting for dependency {dependency} on cluster {cluster}: {source}"
    )]
    DependencyNotReady {
        /// Dependent addon
        addon: String,
        /// Dependency that never converged
        dependency: String,
        /// Cluster name
        cluster: String,
        /// Why the wait ended
        source: ContextError,
    },

    /// A declared dependency reported a permanent readiness failure
    #[error("addon {addon} cannot deploy: dependency {dependency} on cluster {cluster} failed: {source}")]
    DependencyFailed {
        /// Dependent addon
        addon: String,
        /// Dependency whose readiness check failed
        dependency: String,
        /// Cluster name
        cluster: String,
        /// The readiness failure
        source: Box<Error>,
    },

    /// The addon dependency graph contains a cycle
    #[error("addon dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle {
        /// Addon names forming the cycle, first name repeated at the end
        cycle: Vec<String>,
    },

    /// The caller's context ended while an operation was pending
    #[error("context done before {operation}: {source}")]
    ContextDone {
        /// The pending operation, naming the resource involved
        operation: String,
        /// Cancellation or deadline
        source: ContextError,
    },

    /// One or more namespaces could not be confirmed deleted
    #[error("failed to clean up namespaces: {}", format_failures(failures))]
    NamespaceCleanup {
        /// (namespace, reason) for every namespace that failed
        failures: Vec<(String, String)>,
    },

    /// An addon's own deploy/delete logic failed
    #[error("addon {addon}: {message}")]
    Addon {
        /// Addon name
        addon: String,
        /// Description of what failed
        message: String,
    },

    /// A polled resource reached a terminal failure state
    #[error("{resource} failed: {message}")]
    ReadinessFailed {
        /// The resource that failed (e.g., "Job ns/name")
        resource: String,
        /// Description of the failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "apply_manifest", "create_client")
        context: String,
    },
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(ns, reason)| format!("{}: {}", ns, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an error wrapping a context cancellation or deadline
    pub fn context_done(operation: impl Into<String>, source: ContextError) -> Self {
        Self::ContextDone {
            operation: operation.into(),
            source,
        }
    }

    /// Create an addon error
    pub fn addon(addon: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Addon {
            addon: addon.into(),
            message: msg.into(),
        }
    }

    /// Create a readiness failure for a resource in a terminal state
    pub fn readiness_failed(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ReadinessFailed {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify a kube-rs error against the resource it concerned.
    ///
    /// 404, 409 (AlreadyExists) and 409 (Conflict) become their own variants so
    /// deletion paths can tolerate them without string matching.
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::already_exists(kind, name)
            }
            kube::Error::Api(resp) if resp.code == 409 => Self::conflict(kind, name),
            _ => Self::Kube { source: err },
        }
    }

    /// Whether this error means the object is already gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(resp),
            } => resp.code == 404,
            _ => false,
        }
    }

    /// Whether this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether this error means the object already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether this error was caused by the caller's context ending
    pub fn is_context_done(&self) -> bool {
        matches!(
            self,
            Self::ContextDone { .. } | Self::DependencyNotReady { .. }
        )
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Conflicts and server-side 429/5xx responses are transient; everything
    /// else (including an ended context) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube {
                source: kube::Error::Api(resp),
            } => resp.code == 429 || resp.code >= 500,
            _ => false,
        }
    }
}
