//! Headless native device backed by naga.
//!
//! Compiling parses and fully validates the WGSL module. Creating a pipeline links the stage
//! interfaces the way a GPU driver would reject them: vertex inputs against the vertex layout,
//! vertex outputs against fragment inputs, fragment outputs against attachment types. Linked
//! pipelines are recorded in a file-backed archive keyed by a blake3 digest of the pipeline
//! descriptor; an archived pipeline is materialized without linking.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use crate::device::{
    ArchivePolicy, MeshPipelineDesc, NativeDevice, NativeStage, RenderPipelineDesc,
};
use crate::error::{ArchiveError, CompileError, PipelineError};
use crate::framebuffer::AttachmentDataType;
use crate::state::FragmentOutputState;

const ARCHIVE_MAGIC: [u8; 4] = *b"LTPA";
const ARCHIVE_VERSION: u32 = 1;

type Digest = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScalarClass {
    Float,
    Sint,
    Uint,
    Other,
}

impl From<AttachmentDataType> for ScalarClass {
    fn from(ty: AttachmentDataType) -> Self {
        match ty {
            AttachmentDataType::Float => ScalarClass::Float,
            AttachmentDataType::Int => ScalarClass::Sint,
            AttachmentDataType::Uint => ScalarClass::Uint,
        }
    }
}

/// A location-bound entry point input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct InterfaceVar {
    location: u32,
    class: ScalarClass,
    components: u8,
}

fn shape(inner: &naga::TypeInner) -> Option<(ScalarClass, u8)> {
    let (scalar, components) = match inner {
        naga::TypeInner::Scalar(scalar) => (*scalar, 1),
        naga::TypeInner::Vector { size, scalar } => {
            let components = match size {
                naga::VectorSize::Bi => 2,
                naga::VectorSize::Tri => 3,
                naga::VectorSize::Quad => 4,
            };
            (*scalar, components)
        }
        _ => return None,
    };
    let class = match scalar.kind {
        naga::ScalarKind::Float => ScalarClass::Float,
        naga::ScalarKind::Sint => ScalarClass::Sint,
        naga::ScalarKind::Uint => ScalarClass::Uint,
        _ => ScalarClass::Other,
    };
    Some((class, components))
}

fn collect_interface(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    out: &mut Vec<InterfaceVar>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => {
            if let Some((class, components)) = shape(&module.types[ty].inner) {
                out.push(InterfaceVar {
                    location: *location,
                    class,
                    components,
                });
            }
        }
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_interface(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

/// A validated WGSL module plus the interface of one entry point.
#[derive(Debug, Clone)]
pub struct NagaFunction {
    module: Arc<naga::Module>,
    entry_point: String,
    stage: NativeStage,
    digest: Digest,
    inputs: Vec<InterfaceVar>,
    outputs: Vec<InterfaceVar>,
}

impl NagaFunction {
    pub fn module(&self) -> &naga::Module {
        &self.module
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn stage(&self) -> NativeStage {
        self.stage
    }

    pub fn input_locations(&self) -> Vec<u32> {
        self.inputs.iter().map(|v| v.location).collect()
    }

    pub fn output_locations(&self) -> Vec<u32> {
        self.outputs.iter().map(|v| v.location).collect()
    }

    fn expect_stage(&self, stage: NativeStage) -> Result<(), PipelineError> {
        if self.stage != stage {
            return Err(PipelineError::Link(format!(
                "`{}` is a {:?} function, expected {stage:?}",
                self.entry_point, self.stage
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NagaPipelineKind {
    Render,
    Mesh,
}

/// Locations that took part in linking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
struct LinkedInterface {
    varyings: Vec<u32>,
    color_outputs: Vec<u32>,
}

impl LinkedInterface {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for list in [&self.varyings, &self.color_outputs] {
            out.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for location in list {
                out.extend_from_slice(&location.to_le_bytes());
            }
        }
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let mut reader = Reader::new(bytes);
        let mut lists = [Vec::new(), Vec::new()];
        for list in &mut lists {
            let len = reader.u32()?;
            for _ in 0..len {
                list.push(reader.u32()?);
            }
        }
        if !reader.is_empty() {
            return None;
        }
        let [varyings, color_outputs] = lists;
        Some(Self {
            varyings,
            color_outputs,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NagaPipeline {
    kind: NagaPipelineKind,
    digest: Digest,
    linked: LinkedInterface,
    from_archive: bool,
}

impl NagaPipeline {
    pub fn kind(&self) -> NagaPipelineKind {
        self.kind
    }

    /// Digest of the descriptor this pipeline was built from.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Materialized from the archive instead of being linked.
    pub fn from_archive(&self) -> bool {
        self.from_archive
    }

    pub fn varying_locations(&self) -> &[u32] {
        &self.linked.varyings
    }

    pub fn color_output_locations(&self) -> &[u32] {
        &self.linked.color_outputs
    }
}

/// Linked pipelines keyed by descriptor digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NagaArchive {
    entries: BTreeMap<Digest, Vec<u8>>,
}

impl NagaArchive {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ARCHIVE_MAGIC);
        out.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (digest, blob) in &self.entries {
            out.extend_from_slice(digest);
            out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            out.extend_from_slice(blob);
        }
        let checksum = blake3::hash(&out);
        out.extend_from_slice(checksum.as_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let corrupt = |what: &str| ArchiveError::Corrupt(what.to_owned());

        if bytes.len() < 32 {
            return Err(corrupt("truncated file"));
        }
        let (body, checksum) = bytes.split_at(bytes.len() - 32);
        if blake3::hash(body).as_bytes() != checksum {
            return Err(corrupt("checksum mismatch"));
        }

        let mut reader = Reader::new(body);
        if reader.take(4) != Some(&ARCHIVE_MAGIC[..]) {
            return Err(corrupt("bad magic"));
        }
        match reader.u32() {
            Some(ARCHIVE_VERSION) => {}
            Some(other) => {
                return Err(ArchiveError::Corrupt(format!("unsupported version {other}")))
            }
            None => return Err(corrupt("truncated header")),
        }
        let count = reader.u32().ok_or_else(|| corrupt("truncated header"))?;

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let digest: Digest = reader
                .take(32)
                .and_then(|d| d.try_into().ok())
                .ok_or_else(|| corrupt("truncated entry"))?;
            let len = reader.u32().ok_or_else(|| corrupt("truncated entry"))?;
            let blob = reader
                .take(len as usize)
                .ok_or_else(|| corrupt("truncated entry"))?;
            entries.insert(digest, blob.to_vec());
        }
        if !reader.is_empty() {
            return Err(corrupt("trailing bytes"));
        }
        Ok(Self { entries })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < n {
            return None;
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Some(head)
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Feeds derived `Hash` impls into blake3.
struct DigestWriter(blake3::Hasher);

impl Hasher for DigestWriter {
    fn finish(&self) -> u64 {
        let hash = self.0.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(word)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

fn render_digest(desc: &RenderPipelineDesc<'_, NagaFunction>) -> Digest {
    let mut w = DigestWriter(blake3::Hasher::new());
    w.write(b"render");
    w.write(&desc.vertex.digest);
    w.write(&desc.fragment.digest);
    desc.vertex_layout.hash(&mut w);
    desc.output.hash(&mut w);
    desc.raster.hash(&mut w);
    *w.0.finalize().as_bytes()
}

fn mesh_digest(desc: &MeshPipelineDesc<'_, NagaFunction>) -> Digest {
    let mut w = DigestWriter(blake3::Hasher::new());
    w.write(b"mesh");
    w.write(&desc.object.digest);
    w.write(&desc.mesh.digest);
    w.write(&desc.fragment.digest);
    desc.output.hash(&mut w);
    desc.raster.hash(&mut w);
    *w.0.finalize().as_bytes()
}

fn link_color_outputs(
    fragment: &NagaFunction,
    output: &FragmentOutputState,
) -> Result<Vec<u32>, PipelineError> {
    let mut linked = Vec::new();
    for out in &fragment.outputs {
        // Outputs without an attachment are discarded.
        let Some(Some(target)) = output.color_targets.get(out.location as usize) else {
            continue;
        };
        let expected = ScalarClass::from(target.format.data_type());
        if out.class != expected {
            return Err(PipelineError::Link(format!(
                "fragment output @location({}) is {:?} but attachment {:?} expects {expected:?}",
                out.location, out.class, target.format
            )));
        }
        linked.push(out.location);
    }
    Ok(linked)
}

fn link_render(desc: &RenderPipelineDesc<'_, NagaFunction>) -> Result<LinkedInterface, PipelineError> {
    desc.vertex.expect_stage(NativeStage::Vertex)?;
    desc.fragment.expect_stage(NativeStage::Fragment)?;

    for input in &desc.vertex.inputs {
        let attribute = desc
            .vertex_layout
            .buffers
            .iter()
            .flat_map(|b| b.attributes.iter())
            .find(|a| a.location == input.location);
        if attribute.is_none() {
            return Err(PipelineError::Link(format!(
                "vertex input @location({}) has no vertex attribute",
                input.location
            )));
        }
        if input.class != ScalarClass::Uint {
            return Err(PipelineError::Link(format!(
                "vertex input @location({}) is {:?}, vertex data is fetched as raw uints",
                input.location, input.class
            )));
        }
    }

    let mut varyings = Vec::new();
    for input in &desc.fragment.inputs {
        let Some(output) = desc
            .vertex
            .outputs
            .iter()
            .find(|o| o.location == input.location)
        else {
            return Err(PipelineError::Link(format!(
                "fragment input @location({}) is not written by the vertex stage",
                input.location
            )));
        };
        if output.class != input.class || output.components != input.components {
            return Err(PipelineError::Link(format!(
                "varying @location({}) type differs between stages",
                input.location
            )));
        }
        varyings.push(input.location);
    }

    Ok(LinkedInterface {
        varyings,
        color_outputs: link_color_outputs(desc.fragment, desc.output)?,
    })
}

#[derive(Debug, Default)]
pub struct NagaDevice {
    pipeline_compiles: u64,
}

impl NagaDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NativeDevice for NagaDevice {
    type Function = NagaFunction;
    type Pipeline = NagaPipeline;
    type Archive = NagaArchive;

    fn compile_function(
        &mut self,
        source: &str,
        entry_point: &str,
        stage: NativeStage,
    ) -> Result<NagaFunction, CompileError> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| CompileError::new(entry_point, e.emit_to_string(source), source))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| CompileError::new(entry_point, e.emit_to_string(source), source))?;

        let naga_stage = match stage {
            NativeStage::Vertex => naga::ShaderStage::Vertex,
            NativeStage::Fragment => naga::ShaderStage::Fragment,
            NativeStage::Compute => naga::ShaderStage::Compute,
        };
        let Some(ep) = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point && ep.stage == naga_stage)
        else {
            return Err(CompileError::new(
                entry_point,
                format!("no {stage:?} entry point named `{entry_point}`"),
                source,
            ));
        };

        let mut inputs = Vec::new();
        for arg in &ep.function.arguments {
            collect_interface(&module, arg.ty, arg.binding.as_ref(), &mut inputs);
        }
        let mut outputs = Vec::new();
        if let Some(result) = &ep.function.result {
            collect_interface(&module, result.ty, result.binding.as_ref(), &mut outputs);
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(entry_point.as_bytes());
        hasher.update(&[stage as u8]);
        hasher.update(source.as_bytes());

        Ok(NagaFunction {
            module: Arc::new(module),
            entry_point: entry_point.to_owned(),
            stage,
            digest: *hasher.finalize().as_bytes(),
            inputs,
            outputs,
        })
    }

    fn open_archive(&mut self, path: Option<&Path>) -> Result<NagaArchive, ArchiveError> {
        let Some(path) = path else {
            return Ok(NagaArchive::default());
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        NagaArchive::decode(&bytes)
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc<'_, NagaFunction>,
        archive: Option<&NagaArchive>,
        policy: ArchivePolicy,
    ) -> Result<NagaPipeline, PipelineError> {
        let digest = render_digest(desc);
        if let Some(blob) = archive.and_then(|a| a.entries.get(&digest)) {
            match LinkedInterface::decode(blob) {
                Some(linked) => {
                    return Ok(NagaPipeline {
                        kind: NagaPipelineKind::Render,
                        digest,
                        linked,
                        from_archive: true,
                    })
                }
                None => tracing::warn!("unreadable archive entry, relinking"),
            }
        }
        if policy == ArchivePolicy::FailOnArchiveMiss {
            return Err(PipelineError::ArchiveMiss);
        }

        let linked = link_render(desc)?;
        self.pipeline_compiles += 1;
        Ok(NagaPipeline {
            kind: NagaPipelineKind::Render,
            digest,
            linked,
            from_archive: false,
        })
    }

    fn add_render_pipeline_functions(
        &mut self,
        archive: &mut NagaArchive,
        desc: &RenderPipelineDesc<'_, NagaFunction>,
    ) -> Result<(), ArchiveError> {
        let linked = link_render(desc).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        archive.entries.insert(render_digest(desc), linked.encode());
        Ok(())
    }

    fn create_mesh_pipeline(
        &mut self,
        desc: &MeshPipelineDesc<'_, NagaFunction>,
    ) -> Result<NagaPipeline, PipelineError> {
        desc.object.expect_stage(NativeStage::Compute)?;
        desc.mesh.expect_stage(NativeStage::Compute)?;
        desc.fragment.expect_stage(NativeStage::Fragment)?;

        let color_outputs = link_color_outputs(desc.fragment, desc.output)?;
        self.pipeline_compiles += 1;
        Ok(NagaPipeline {
            kind: NagaPipelineKind::Mesh,
            digest: mesh_digest(desc),
            linked: LinkedInterface {
                varyings: Vec::new(),
                color_outputs,
            },
            from_archive: false,
        })
    }

    fn serialize_archive(&mut self, archive: &NagaArchive, path: &Path) -> Result<(), ArchiveError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, archive.encode())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn pipeline_compile_count(&self) -> u64 {
        self.pipeline_compiles
    }
}
