//! WGSL to SPIR-V shader compilation.
//!
//! Shaders are authored in WGSL, parsed and validated with naga and written
//! out as SPIR-V for one stage and entry point at a time. Compiled words are
//! cached per (path, stage, entry point), so generating the same pipeline for
//! every swapchain image only compiles each stage once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::profiling::profile_scope;
use crate::types::ShaderStage;

type CacheKey = (PathBuf, ShaderStage, String);

/// Compiles WGSL files to SPIR-V and caches the result.
#[derive(Debug)]
pub struct ShaderCompiler {
    shader_dir: PathBuf,
    cache: Mutex<HashMap<CacheKey, Arc<Vec<u32>>>>,
}

impl ShaderCompiler {
    /// Create a compiler resolving relative paths against `shader_dir`.
    pub fn new(shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Directory relative paths are resolved against.
    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    /// Resolve `path` against the shader directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.shader_dir.join(path)
        }
    }

    /// Number of cached stage compilations.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Compile the `entry_point` of a WGSL file for `stage`.
    pub fn compile_file(
        &self,
        path: impl AsRef<Path>,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<Arc<Vec<u32>>, GraphicsError> {
        let path = self.resolve(path);
        let key = (path.clone(), stage, entry_point.to_string());
        if let Some(words) = self.cache.lock().get(&key) {
            return Ok(words.clone());
        }

        let source = std::fs::read_to_string(&path).map_err(|e| {
            GraphicsError::Io(format!("failed to read shader {}: {e}", path.display()))
        })?;
        log::debug!(
            "Compiling {} ({:?}, entry '{}')",
            path.display(),
            stage,
            entry_point
        );
        let words = Arc::new(compile_wgsl(&source, stage, entry_point)?);
        self.cache.lock().insert(key, words.clone());
        Ok(words)
    }
}

/// Compile WGSL source to SPIR-V for one stage and entry point.
pub fn compile_wgsl(
    source: &str,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<Vec<u32>, GraphicsError> {
    profile_scope!("compile_wgsl");

    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| GraphicsError::ShaderCompilationFailed(format!("WGSL parse error: {e}")))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| GraphicsError::ShaderCompilationFailed(format!("Validation error: {e:?}")))?;

    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == naga_stage)
    {
        return Err(GraphicsError::ShaderCompilationFailed(format!(
            "Entry point '{}' not found for stage {:?}",
            entry_point, stage
        )));
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 0),
        flags: naga::back::spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };

    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| GraphicsError::ShaderCompilationFailed(format!("SPIR-V generation error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
        @vertex
        fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(position, 1.0);
        }

        @fragment
        fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0, 0.0, 0.0, 1.0);
        }
    "#;

    #[test]
    fn test_compile_both_stages() {
        let vs = compile_wgsl(TRIANGLE, ShaderStage::Vertex, "vs_main").unwrap();
        let fs = compile_wgsl(TRIANGLE, ShaderStage::Fragment, "fs_main").unwrap();
        // SPIR-V magic number
        assert_eq!(vs[0], 0x0723_0203);
        assert_eq!(fs[0], 0x0723_0203);
    }

    #[test]
    fn test_missing_entry_point() {
        let err = compile_wgsl(TRIANGLE, ShaderStage::Vertex, "fs_main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompilationFailed(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = compile_wgsl("fn broken(", ShaderStage::Vertex, "main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompilationFailed(_)));
    }

    #[test]
    fn test_shipped_shaders_compile_and_cache() {
        let compiler = ShaderCompiler::new(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"));
        for file in ["opaque.wgsl", "floor_grid.wgsl"] {
            compiler
                .compile_file(file, ShaderStage::Vertex, "vs_main")
                .unwrap();
            compiler
                .compile_file(file, ShaderStage::Fragment, "fs_main")
                .unwrap();
        }
        assert_eq!(compiler.cached_count(), 4);

        compiler
            .compile_file("opaque.wgsl", ShaderStage::Vertex, "vs_main")
            .unwrap();
        assert_eq!(compiler.cached_count(), 4);
    }

    #[test]
    fn test_missing_file() {
        let compiler = ShaderCompiler::new("/nonexistent");
        let err = compiler
            .compile_file("nope.wgsl", ShaderStage::Vertex, "vs_main")
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Io(_)));
    }
}
