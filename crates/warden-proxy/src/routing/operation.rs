use axum::http::Method;

/// Kind of configuration object guarded on write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// `secrets`
    Secret,
    /// `configmaps`
    ConfigMap,
}

/// Kubernetes operations that need an extra check before forwarding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum K8sOperation {
    /// `DELETE /api/v1/namespaces/{namespace}`
    NamespaceDelete {
        /// Namespace being deleted
        namespace: String,
    },
    /// Create, update, patch or delete of a secret or config map
    ConfigurationWrite {
        /// Namespace of the object
        namespace: String,
        /// Object kind
        kind: ConfigKind,
    },
    /// `/api/v1/namespaces/{namespace}/pods/{pod}/exec`
    PodExec {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        pod: String,
    },
    /// Anything else, left to the backend's RBAC
    Other,
}

impl K8sOperation {
    /// Namespace the operation targets, if it is guarded
    pub fn namespace(&self) -> Option<&str> {
        match self {
            K8sOperation::NamespaceDelete { namespace }
            | K8sOperation::ConfigurationWrite { namespace, .. }
            | K8sOperation::PodExec { namespace, .. } => Some(namespace),
            K8sOperation::Other => None,
        }
    }
}

/// Whether the method modifies state
pub fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Classify a Kubernetes API path (without the environment prefix)
pub fn classify(method: &Method, path: &str) -> K8sOperation {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["api", "v1", "namespaces", namespace] if *method == Method::DELETE => {
            K8sOperation::NamespaceDelete {
                namespace: namespace.to_string(),
            }
        }
        ["api", "v1", "namespaces", namespace, "pods", pod, "exec"] => K8sOperation::PodExec {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        },
        ["api", "v1", "namespaces", namespace, resource, ..]
            if is_write_method(method) && segments.len() <= 6 =>
        {
            let kind = match *resource {
                "secrets" => ConfigKind::Secret,
                "configmaps" => ConfigKind::ConfigMap,
                _ => return K8sOperation::Other,
            };
            K8sOperation::ConfigurationWrite {
                namespace: namespace.to_string(),
                kind,
            }
        }
        _ => K8sOperation::Other,
    }
}
