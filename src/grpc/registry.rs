//! Descriptor registry.
//!
//! One `DescriptorPool` guarded by a reader/writer lock. The pool only ever
//! grows within a session: uploads and reflection queries accumulate, and
//! every service name ever inserted stays resolvable.

use prost_reflect::{DescriptorPool, ServiceDescriptor};
use prost_types::FileDescriptorSet;
use std::sync::RwLock;

use super::error::{GrpcError, GrpcResult};
use super::{MethodInfo, ServiceInfo, StreamKind};

/// Monotonic registry of protobuf file and service descriptors.
pub struct ProtoRegistry {
    pool: RwLock<DescriptorPool>,
}

impl Default for ProtoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtoRegistry {
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(DescriptorPool::new()),
        }
    }

    /// Fold a descriptor set into the pool. Files already present are
    /// skipped so repeated uploads and overlapping reflection responses stay
    /// idempotent.
    pub fn add_file_descriptor_set(&self, descriptors: FileDescriptorSet) -> GrpcResult<()> {
        let mut pool = self.pool.write().expect("registry lock poisoned");

        let fresh: Vec<_> = descriptors
            .file
            .into_iter()
            .filter(|file| pool.get_file_by_name(file.name()).is_none())
            .collect();

        if fresh.is_empty() {
            return Ok(());
        }

        pool.add_file_descriptor_set(FileDescriptorSet { file: fresh })
            .map_err(|err| GrpcError::Descriptor(err.to_string()))
    }

    /// Resolve a service by fully-qualified name.
    pub fn service(&self, full_name: &str) -> Option<ServiceDescriptor> {
        self.pool
            .read()
            .expect("registry lock poisoned")
            .get_service_by_name(full_name)
    }

    /// All services currently known to the registry.
    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.pool
            .read()
            .expect("registry lock poisoned")
            .services()
            .collect()
    }

    /// Describe every registered service for the UI.
    pub fn describe_all(&self) -> Vec<ServiceInfo> {
        self.services().iter().map(describe_service).collect()
    }

    /// Describe a named subset of services, in the given order.
    pub fn describe(&self, names: &[String]) -> Vec<ServiceInfo> {
        names
            .iter()
            .filter_map(|name| self.service(name))
            .map(|service| describe_service(&service))
            .collect()
    }
}

fn describe_service(service: &ServiceDescriptor) -> ServiceInfo {
    ServiceInfo {
        name: service.full_name().to_string(),
        methods: service
            .methods()
            .map(|method| MethodInfo {
                name: method.name().to_string(),
                kind: StreamKind::of(&method),
                input_type: method.input().full_name().to_string(),
                output_type: method.output().full_name().to_string(),
            })
            .collect(),
    }
}
