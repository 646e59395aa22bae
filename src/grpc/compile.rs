//! In-memory .proto compilation.
//!
//! Uploaded sources never touch the filesystem: a map-backed resolver feeds
//! them to the compiler, chained behind the built-in well-known types so
//! `google/protobuf/*.proto` imports resolve.

use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use protox::Compiler;
use std::collections::HashMap;

use prost_types::FileDescriptorSet;

use super::error::{GrpcError, GrpcResult};
use super::ProtoFile;

struct MemoryResolver {
    files: HashMap<String, String>,
}

impl FileResolver for MemoryResolver {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        match self.files.get(name) {
            Some(source) => File::from_source(name, source),
            None => Err(protox::Error::file_not_found(name)),
        }
    }
}

/// Compile uploaded sources into a descriptor set, imports included.
pub fn compile_sources(files: Vec<ProtoFile>) -> GrpcResult<FileDescriptorSet> {
    let names: Vec<String> = files.iter().map(|file| file.name.clone()).collect();

    let mut resolver = ChainFileResolver::new();
    resolver.add(GoogleFileResolver::new());
    resolver.add(MemoryResolver {
        files: files
            .into_iter()
            .map(|file| (file.name, file.content))
            .collect(),
    });

    let mut compiler = Compiler::with_file_resolver(resolver);
    compiler.include_imports(true);
    compiler
        .open_files(names)
        .map_err(|err| GrpcError::Compile(err.to_string()))?;

    Ok(compiler.file_descriptor_set())
}
