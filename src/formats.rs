use std::fmt;

/// Output formats the export flow can offer.
///
/// All variants except [`ExportFormat::Kcl`] are CAD formats produced by the
/// conversion service. `Kcl` is the pseudo-format: the textual source
/// representation supplied alongside a generation result. It is never sent
/// to the conversion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Fbx,
    Glb,
    Gltf,
    Obj,
    Ply,
    Stl,
    Step,
    Kcl,
}

/// The one format generation natively produces. It is the only format
/// guaranteed present in a successful result's outputs and the sole valid
/// input to a conversion call.
pub const CANONICAL_SOURCE_FORMAT: ExportFormat = ExportFormat::Gltf;

/// Every concrete (convertible) format, in menu order.
pub const CONVERTIBLE_FORMATS: &[ExportFormat] = &[
    ExportFormat::Fbx,
    ExportFormat::Glb,
    ExportFormat::Gltf,
    ExportFormat::Obj,
    ExportFormat::Ply,
    ExportFormat::Stl,
    ExportFormat::Step,
];

impl ExportFormat {
    /// Parse a lowercase format name as used in output keys and URL paths.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fbx" => Some(Self::Fbx),
            "glb" => Some(Self::Glb),
            "gltf" => Some(Self::Gltf),
            "obj" => Some(Self::Obj),
            "ply" => Some(Self::Ply),
            "stl" => Some(Self::Stl),
            "step" => Some(Self::Step),
            "kcl" => Some(Self::Kcl),
            _ => None,
        }
    }

    /// File extension, also the wire name of the format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Fbx => "fbx",
            Self::Glb => "glb",
            Self::Gltf => "gltf",
            Self::Obj => "obj",
            Self::Ply => "ply",
            Self::Stl => "stl",
            Self::Step => "step",
            Self::Kcl => "kcl",
        }
    }

    /// Content type for downloads. The values for concrete formats are an
    /// external contract with the conversion service — do not change them.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Fbx | Self::Obj | Self::Ply => "application/octet-stream",
            Self::Glb => "model/gltf-binary",
            Self::Gltf => "model/gltf+json",
            Self::Stl => "application/sla",
            Self::Step => "application/STEP",
            Self::Kcl => "text/plain",
        }
    }

    /// True for the source-code pseudo-format, which never reaches the
    /// conversion endpoint.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Kcl)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Derive a download file name from the prompt text: lowercase, characters
/// outside letters/digits stripped, whitespace runs collapsed to single
/// hyphens, leading/trailing hyphens trimmed, then `.<extension>`.
pub fn derive_file_name(prompt: &str, format: ExportFormat) -> String {
    let mut slug = String::with_capacity(prompt.len());
    let mut pending_hyphen = false;

    for c in prompt.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            for lc in c.to_lowercase() {
                slug.push(lc);
            }
        } else if c.is_whitespace() {
            pending_hyphen = true;
        }
        // Other punctuation is stripped without splitting the word.
    }

    format!("{}.{}", slug, format.extension())
}
