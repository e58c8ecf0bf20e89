//! Camera, light and the per-frame uniform block.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Uniform block shared by every pipeline, one copy per presentable image.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniform {
    pub view_proj: Mat4,
    pub light_view_proj: Mat4,
    pub light_dir: Vec4,
    pub camera_pos: Vec4,
}

impl FrameUniform {
    pub const SIZE: u64 = std::mem::size_of::<FrameUniform>() as u64;
}

/// Orbiting perspective camera.
#[derive(Debug, Clone)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            target: Vec3::new(0.0, 1.0, 0.0),
            distance: 9.0,
            yaw: 0.6,
            pitch: 0.45,
            fov_y: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target
            + Vec3::new(
                cos_pitch * sin_yaw,
                sin_pitch,
                cos_pitch * cos_yaw,
            ) * self.distance
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(self.position(), self.target, Vec3::Y);
        let mut proj = Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far);
        // Vulkan clip space has an inverted Y relative to GL conventions.
        proj.y_axis.y *= -1.0;
        proj * view
    }
}

/// Directional light with an orthographic shadow frustum over the scene.
#[derive(Debug, Clone)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub shadow_extent: f32,
    pub shadow_near: f32,
    pub shadow_far: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            shadow_extent: 14.0,
            shadow_near: 1.0,
            shadow_far: 40.0,
        }
    }
}

impl DirectionalLight {
    /// View-projection matrix used for both rendering the shadow map and
    /// projecting fragments into it.
    pub fn view_proj(&self) -> Mat4 {
        let center = Vec3::new(0.0, 0.0, 0.0);
        let eye = center - self.direction * (self.shadow_far * 0.5);
        let up = if self.direction.abs_diff_eq(Vec3::NEG_Y, 1e-3) {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_at_rh(eye, center, up);
        let e = self.shadow_extent;
        let mut proj = Mat4::orthographic_rh(-e, e, -e, e, self.shadow_near, self.shadow_far);
        proj.y_axis.y *= -1.0;
        proj * view
    }
}

/// CPU-side state feeding the uniform ring each frame.
pub struct SceneState {
    pub camera: Camera,
    pub light: DirectionalLight,
    pub elapsed: f32,
}

impl SceneState {
    pub fn new() -> Self {
        Self {
            camera: Camera::default(),
            light: DirectionalLight::default(),
            elapsed: 0.0,
        }
    }

    pub fn advance(&mut self, delta_time: f32) {
        self.elapsed += delta_time;
        self.camera.yaw = 0.6 + self.elapsed * 0.2;
    }

    pub fn frame_uniform(&self, aspect: f32) -> FrameUniform {
        FrameUniform {
            view_proj: self.camera.view_proj(aspect),
            light_view_proj: self.light.view_proj(),
            light_dir: self.light.direction.extend(0.0),
            camera_pos: self.camera.position().extend(1.0),
        }
    }
}

impl Default for SceneState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_uniform_size_matches_shader_block() {
        // Two mat4x4 plus two vec4.
        assert_eq!(FrameUniform::SIZE, 128 + 32);
    }

    #[test]
    fn camera_orbits_at_fixed_distance() {
        let camera = Camera::default();
        let d = (camera.position() - camera.target).length();
        assert!((d - camera.distance).abs() < 1e-4);
    }

    #[test]
    fn light_frustum_contains_the_origin() {
        let light = DirectionalLight::default();
        let clip = light.view_proj() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0);
        assert!(ndc.z >= 0.0 && ndc.z <= 1.0);
    }

    #[test]
    fn straight_down_light_still_produces_a_valid_matrix() {
        let light = DirectionalLight {
            direction: Vec3::NEG_Y,
            ..Default::default()
        };
        let matrix = light.view_proj();
        assert!(matrix.is_finite());
    }
}
