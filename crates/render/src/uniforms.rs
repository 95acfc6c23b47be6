use crate::camera::CameraMatrices;
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::Serialize;
use std::collections::BTreeMap;

/// GLSL type of a declared uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    IVec2,
    Vec3,
    Vec4,
    Mat4,
    /// Any sampler type. Bound to a texture unit, not stored in the block.
    Sampler,
}

impl UniformKind {
    pub fn from_glsl(ty: &str) -> Option<Self> {
        let kind = match ty {
            "float" => Self::Float,
            "int" | "uint" | "bool" => Self::Int,
            "vec2" => Self::Vec2,
            "ivec2" => Self::IVec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "mat4" => Self::Mat4,
            t if t.contains("sampler") => Self::Sampler,
            _ => return None,
        };
        Some(kind)
    }

    /// std140 `(size, alignment)` in bytes. `None` for samplers.
    fn std140(self) -> Option<(usize, usize)> {
        match self {
            Self::Float | Self::Int => Some((4, 4)),
            Self::Vec2 | Self::IVec2 => Some((8, 8)),
            Self::Vec3 => Some((12, 16)),
            Self::Vec4 => Some((16, 16)),
            Self::Mat4 => Some((64, 16)),
            Self::Sampler => None,
        }
    }
}

/// A value written to a uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    IVec2([i32; 2]),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    TextureUnit(u32),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Float(_) => UniformKind::Float,
            Self::Int(_) => UniformKind::Int,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::IVec2(_) => UniformKind::IVec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Mat4(_) => UniformKind::Mat4,
            Self::TextureUnit(_) => UniformKind::Sampler,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}

/// Where a uniform lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UniformSlot {
    pub kind: UniformKind,
    /// Byte offset in the staging block. `None` for samplers.
    pub offset: Option<usize>,
}

/// Uniforms declared by a program, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UniformTable {
    slots: BTreeMap<String, UniformSlot>,
    /// Declaration order, which also fixes the std140 layout.
    order: Vec<String>,
    block_size: usize,
}

impl UniformTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the uniforms declared by one flattened stage.
    pub fn from_source(source: &str) -> Self {
        Self::from_sources(&[source])
    }

    /// Collect uniforms across stages. A name declared in several stages
    /// keeps its first declaration.
    pub fn from_sources(sources: &[&str]) -> Self {
        let mut table = Self::new();
        for source in sources {
            let code = strip_comments(source);
            let code: Vec<&str> = code
                .lines()
                .filter(|line| !line.trim_start().starts_with('#'))
                .collect();
            // Declarations may span lines; a closing brace ends a function
            // body that has no trailing `;`.
            for statement in code.join("\n").split([';', '}']) {
                table.declare_statement(statement);
            }
        }
        table
    }

    /// Declare a uniform. Returns false if the name already exists.
    pub fn declare(&mut self, name: &str, kind: UniformKind) -> bool {
        if let Some(existing) = self.slots.get(name) {
            if existing.kind != kind {
                tracing::warn!(
                    name,
                    first = ?existing.kind,
                    second = ?kind,
                    "uniform redeclared with a different type, keeping the first"
                );
            }
            return false;
        }

        let offset = kind.std140().map(|(size, align)| {
            let offset = self.block_size.next_multiple_of(align);
            self.block_size = offset + size;
            offset
        });
        self.slots.insert(name.to_string(), UniformSlot { kind, offset });
        self.order.push(name.to_string());
        true
    }

    fn declare_statement(&mut self, statement: &str) {
        let mut rest = statement.trim();
        if rest.starts_with("layout") {
            match rest.find(')') {
                Some(close) => rest = rest[close + 1..].trim_start(),
                None => return,
            }
        }
        let Some(decl) = rest.strip_prefix("uniform") else {
            return;
        };
        if !decl.starts_with(char::is_whitespace) {
            return;
        }
        if decl.contains('{') {
            tracing::debug!(statement, "skipping uniform block");
            return;
        }

        let mut tokens = decl
            .split_whitespace()
            .skip_while(|t| matches!(*t, "lowp" | "mediump" | "highp"));
        let Some(ty) = tokens.next() else {
            return;
        };
        let Some(kind) = UniformKind::from_glsl(ty) else {
            tracing::debug!(ty, "skipping uniform of unsupported type");
            return;
        };

        let names: String = tokens.collect::<Vec<_>>().join(" ");
        for name in names.split(',') {
            let name = name.split('=').next().unwrap_or_default().trim();
            if name.is_empty() {
                continue;
            }
            if name.contains('[') {
                tracing::debug!(name, "skipping uniform array");
                continue;
            }
            self.declare(name, kind);
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformSlot> {
        self.slots.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Uniforms in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformSlot)> {
        self.order
            .iter()
            .filter_map(|name| self.slots.get(name).map(|slot| (name.as_str(), slot)))
    }

    /// Size of the std140 staging block, rounded up to 16 bytes.
    pub fn block_size(&self) -> usize {
        self.block_size.next_multiple_of(16)
    }
}

/// Replace `//` and `/* */` comments with whitespace, keeping line breaks.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match (c, next) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Per-frame inputs for the common shader-toolkit uniforms.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs {
    /// Seconds since start.
    pub time: f32,
    pub frame: u32,
    /// Viewport size in pixels.
    pub resolution: Vec2,
    pub camera: CameraMatrices,
}

/// Texture units OptiFine/Iris bind for gbuffers programs.
pub const TEXTURE_UNITS: &[(&str, u32)] = &[
    ("gtexture", 0),
    ("texture", 0),
    ("tex", 0),
    ("lightmap", 1),
    ("normals", 2),
    ("specular", 3),
    ("shadowtex0", 4),
    ("shadowtex1", 5),
    ("depthtex0", 6),
    ("noisetex", 15),
];

/// Staging memory for a program's uniforms.
///
/// Writes are best effort: a name the program does not declare, or a value of
/// the wrong type, is skipped rather than treated as an error.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    table: UniformTable,
    data: Vec<u8>,
    texture_units: BTreeMap<String, u32>,
}

impl UniformBlock {
    pub fn new(table: UniformTable) -> Self {
        let data = vec![0u8; table.block_size()];
        Self {
            table,
            data,
            texture_units: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &UniformTable {
        &self.table
    }

    /// std140 bytes ready for upload.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Write `value` to `name`. Returns whether anything was written.
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        let value = value.into();
        let Some(slot) = self.table.get(name) else {
            return false;
        };
        if slot.kind != value.kind() {
            tracing::trace!(name, declared = ?slot.kind, given = ?value.kind(), "uniform type mismatch");
            return false;
        }

        let offset = match (value, slot.offset) {
            (UniformValue::TextureUnit(unit), _) => {
                self.texture_units.insert(name.to_string(), unit);
                return true;
            }
            (_, Some(offset)) => offset,
            (_, None) => return false,
        };

        match value {
            UniformValue::Float(v) => self.write(offset, bytemuck::bytes_of(&v)),
            UniformValue::Int(v) => self.write(offset, bytemuck::bytes_of(&v)),
            UniformValue::Vec2(v) => self.write(offset, bytemuck::bytes_of(&v.to_array())),
            UniformValue::IVec2(v) => self.write(offset, bytemuck::bytes_of(&v)),
            UniformValue::Vec3(v) => self.write(offset, bytemuck::bytes_of(&v.to_array())),
            UniformValue::Vec4(v) => self.write(offset, bytemuck::bytes_of(&v.to_array())),
            UniformValue::Mat4(v) => self.write(offset, bytemuck::bytes_of(&v.to_cols_array())),
            UniformValue::TextureUnit(_) => {}
        }
        true
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Bytes currently stored for `name`.
    pub fn value_bytes(&self, name: &str) -> Option<&[u8]> {
        let slot = self.table.get(name)?;
        let (size, _) = slot.kind.std140()?;
        let offset = slot.offset?;
        Some(&self.data[offset..offset + size])
    }

    /// Texture unit assigned to a sampler uniform.
    pub fn texture_unit(&self, name: &str) -> Option<u32> {
        self.texture_units.get(name).copied()
    }

    /// Write the standard time, resolution, camera and texture-unit uniforms.
    /// Returns how many were written.
    pub fn apply_frame(&mut self, inputs: &FrameInputs) -> usize {
        let res = inputs.resolution;
        let cam = &inputs.camera;
        let aspect = if res.y > 0.0 { res.x / res.y } else { 1.0 };

        let mut written = [
            self.set("iTime", inputs.time),
            self.set("frameTimeCounter", inputs.time),
            self.set("frameCounter", inputs.frame as i32),
            self.set("iFrame", inputs.frame as i32),
            self.set("iResolution", res) || self.set("iResolution", res.extend(1.0)),
            self.set("viewWidth", res.x),
            self.set("viewHeight", res.y),
            self.set("aspectRatio", aspect),
            self.set("gbufferModelView", cam.model_view),
            self.set("gbufferModelViewInverse", cam.model_view_inverse),
            self.set("gbufferProjection", cam.projection),
            self.set("gbufferProjectionInverse", cam.projection_inverse),
            self.set("cameraPosition", cam.position),
        ]
        .into_iter()
        .filter(|w| *w)
        .count();

        for (name, unit) in TEXTURE_UNITS {
            if self.set(name, UniformValue::TextureUnit(*unit)) {
                written += 1;
            }
        }
        written
    }
}
