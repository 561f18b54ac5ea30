//! Scene data handed to the render system by value.
//!
//! The render system does not own a scene. Every frame the application
//! passes a [`SceneView`]: the meshes to draw (already uploaded, addressed by
//! [`GeometryHandle`]), the camera and the directional light.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::geometry::{GeometryHandle, PrimitiveRange};

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Interleaved vertex: position followed by normal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

static_assertions::const_assert_eq!(std::mem::size_of::<Vertex>(), 24);

impl Vertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self { position, normal }
    }
}

/// CPU-side primitive: one vertex stream and its `u32` indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshPrimitive {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshPrimitive {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// A unit quad in the XZ plane facing +Y.
    pub fn quad(half_extent: f32) -> Self {
        let h = half_extent;
        let up = [0.0, 1.0, 0.0];
        Self {
            vertices: vec![
                Vertex::new([-h, 0.0, -h], up),
                Vertex::new([h, 0.0, -h], up),
                Vertex::new([h, 0.0, h], up),
                Vertex::new([-h, 0.0, h], up),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }
}

bitflags! {
    /// Built-in passes a mesh takes part in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MeshPasses: u32 {
        const OPAQUE = 1 << 0;
        const FLOOR_GRID = 1 << 1;
    }
}

/// An uploaded mesh placed in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshNode {
    /// Buffer holding the packed primitives.
    pub geometry: GeometryHandle,
    /// Byte ranges of each primitive inside the buffer.
    pub primitives: Vec<PrimitiveRange>,
    /// Model matrix.
    pub transform: Mat4,
    pub passes: MeshPasses,
}

impl MeshNode {
    /// A node drawn by the opaque pass with an identity transform.
    pub fn new(geometry: GeometryHandle, primitives: Vec<PrimitiveRange>) -> Self {
        Self {
            geometry,
            primitives,
            transform: Mat4::identity(),
            passes: MeshPasses::OPAQUE,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_passes(mut self, passes: MeshPasses) -> Self {
        self.passes = passes;
        self
    }
}

/// Camera matrices and position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

impl Camera {
    /// Perspective camera at `eye` looking at `target`, Y up.
    pub fn look_at(eye: Vec3, target: Vec3, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            view: look_at_rh(&eye, &target, &Vec3::y()),
            projection: perspective_rh(std::f32::consts::FRAC_PI_4, aspect, near, far),
            position: eye,
        }
    }

    /// Projection multiplied by view.
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(
            Vec3::new(0.0, 2.0, 5.0),
            Vec3::zeros(),
            16.0 / 9.0,
            0.1,
            1000.0,
        )
    }
}

/// Directional light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels, normalized.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            color: Vec3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
        }
    }
}

/// Everything the built-in passes read from the scene for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneView {
    pub meshes: Vec<MeshNode>,
    pub camera: Camera,
    pub light: DirectionalLight,
}

impl SceneView {
    /// Meshes taking part in any of `passes`.
    pub fn meshes_in(&self, passes: MeshPasses) -> impl Iterator<Item = &MeshNode> {
        self.meshes
            .iter()
            .filter(move |mesh| mesh.passes.intersects(passes))
    }
}

/// Build a right-handed perspective projection with depth range [0, 1].
pub fn perspective_rh(yfov: f32, aspect: f32, znear: f32, zfar: f32) -> Mat4 {
    let f = 1.0 / (yfov / 2.0).tan();
    let nf = 1.0 / (znear - zfar);
    #[rustfmt::skip]
    let result = Mat4::new(
        f / aspect, 0.0,  0.0,              0.0,
        0.0,        f,    0.0,              0.0,
        0.0,        0.0,  zfar * nf,        znear * zfar * nf,
        0.0,        0.0,  -1.0,             0.0,
    );
    result
}

/// Right-handed look-at view matrix.
pub fn look_at_rh(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    let eye_point = nalgebra::Point3::from(*eye);
    let target_point = nalgebra::Point3::from(*target);
    nalgebra::Isometry3::look_at_rh(&eye_point, &target_point, up).to_homogeneous()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_tightly_packed() {
        let vertex = Vertex::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0]);
        let bytes = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[12..16], &0.0f32.to_ne_bytes());
    }

    #[test]
    fn test_meshes_in_filters_by_pass() {
        let scene = SceneView {
            meshes: vec![
                MeshNode::new(GeometryHandle::new(0), Vec::new()),
                MeshNode::new(GeometryHandle::new(1), Vec::new())
                    .with_passes(MeshPasses::FLOOR_GRID),
            ],
            ..Default::default()
        };
        assert_eq!(scene.meshes_in(MeshPasses::OPAQUE).count(), 1);
        assert_eq!(scene.meshes_in(MeshPasses::FLOOR_GRID).count(), 1);
        assert_eq!(scene.meshes_in(MeshPasses::all()).count(), 2);
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 10.0);
        let near = proj * nalgebra::Vector4::new(0.0, 0.0, -1.0, 1.0);
        let far = proj * nalgebra::Vector4::new(0.0, 0.0, -10.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }
}
