use std::collections::HashMap;
use std::sync::Arc;

use chisel_registry::{Registry, RegistryError};
use chisel_world::World;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("no world format handles the '.{0}' extension")]
    UnknownExtension(String),
    #[error("world file is missing the critical key '{0}'")]
    MissingKey(&'static str),
    #[error("world file header is malformed: {0}")]
    BadHeader(String),
    #[error("metadata record {software}/{name} is invalid: {reason}")]
    BadMetadata {
        software: String,
        name: String,
        reason: String,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    World(#[from] chisel_world::WorldError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A pluggable world-file format. Formats work on byte buffers; the
/// world manager owns file IO and the atomic write-replace dance.
pub trait WorldFormat: Send + Sync {
    fn name(&self) -> &'static str;
    /// File extensions (without the dot) this format claims.
    fn extensions(&self) -> &[&'static str];
    /// Whether the container can carry generic metadata records.
    fn supports_metadata(&self) -> bool {
        false
    }
    fn load(&self, data: &[u8], name: &str, registry: &FormatRegistry)
        -> Result<World, FormatError>;
    fn save(&self, world: &World, registry: &FormatRegistry) -> Result<Vec<u8>, FormatError>;
}

type MetadataFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Reader/writer pair for one known metadata record kind. The reader
/// runs on load (validate/migrate), the writer on save. Records with no
/// codec pass through verbatim.
#[derive(Clone)]
pub struct MetadataCodec {
    pub reader: MetadataFn,
    pub writer: MetadataFn,
}

impl MetadataCodec {
    pub fn new(
        reader: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
        writer: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reader: Arc::new(reader),
            writer: Arc::new(writer),
        }
    }

    /// A codec that only checks the record shape, keeping it unchanged.
    pub fn validating(
        validate: impl Fn(&Value) -> Result<(), String> + Send + Sync + Clone + 'static,
    ) -> Self {
        let check = move |value: &Value| -> Result<Value, String> {
            validate(value)?;
            Ok(value.clone())
        };
        Self {
            reader: Arc::new(check.clone()),
            writer: Arc::new(check),
        }
    }
}

/// Resolves file extensions to formats and owns the
/// `(format, softwareTag, metadataName) → codec` table.
pub struct FormatRegistry {
    formats: Registry<Arc<dyn WorldFormat>>,
    extensions: HashMap<String, String>,
    metadata_codecs: HashMap<(String, String, String), MetadataCodec>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            formats: Registry::new("world format"),
            extensions: HashMap::new(),
            metadata_codecs: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        format: Arc<dyn WorldFormat>,
        overwrite: bool,
    ) -> Result<(), RegistryError> {
        debug!(format = format.name(), "registering world format");
        self.formats
            .register(format.name().to_string(), format.clone(), overwrite)?;
        for ext in format.extensions() {
            self.extensions
                .insert(ext.to_ascii_lowercase(), format.name().to_string());
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn WorldFormat>> {
        self.formats.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.formats.has(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn WorldFormat>> {
        self.formats.iter().map(|(_, f)| f)
    }

    /// Resolve a file extension (no dot, case-insensitive) to a format.
    pub fn for_extension(&self, ext: &str) -> Result<&Arc<dyn WorldFormat>, FormatError> {
        let ext = ext.to_ascii_lowercase();
        let name = self
            .extensions
            .get(&ext)
            .ok_or_else(|| FormatError::UnknownExtension(ext.clone()))?;
        self.formats
            .get(name)
            .ok_or(FormatError::UnknownExtension(ext))
    }

    pub fn register_metadata_codec(
        &mut self,
        format: &str,
        software: &str,
        name: &str,
        codec: MetadataCodec,
    ) {
        debug!(format, software, name, "registering metadata codec");
        self.metadata_codecs.insert(
            (format.to_string(), software.to_string(), name.to_string()),
            codec,
        );
    }

    pub fn metadata_codec(
        &self,
        format: &str,
        software: &str,
        name: &str,
    ) -> Option<&MetadataCodec> {
        self.metadata_codecs
            .get(&(format.to_string(), software.to_string(), name.to_string()))
    }

    /// Run a record through its reader, if one is registered. Unknown
    /// records pass through untouched; a failing reader is an error so
    /// corrupt known records fail the load instead of silently mutating.
    pub fn read_metadata(
        &self,
        format: &str,
        software: &str,
        name: &str,
        value: Value,
    ) -> Result<Value, FormatError> {
        match self.metadata_codec(format, software, name) {
            Some(codec) => (codec.reader.as_ref())(&value).map_err(|reason| FormatError::BadMetadata {
                software: software.to_string(),
                name: name.to_string(),
                reason,
            }),
            None => {
                warn!(software, name, "no metadata codec, keeping record verbatim");
                Ok(value)
            }
        }
    }

    pub fn write_metadata(
        &self,
        format: &str,
        software: &str,
        name: &str,
        value: Value,
    ) -> Result<Value, FormatError> {
        match self.metadata_codec(format, software, name) {
            Some(codec) => (codec.writer.as_ref())(&value).map_err(|reason| FormatError::BadMetadata {
                software: software.to_string(),
                name: name.to_string(),
                reason,
            }),
            None => Ok(value),
        }
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obsidian_world::ObsidianWorldFormat;
    use crate::raw_gzip::RawGzipFormat;
    use serde_json::json;

    fn registry() -> FormatRegistry {
        let mut registry = FormatRegistry::new();
        registry.register(Arc::new(RawGzipFormat), false).unwrap();
        registry
            .register(Arc::new(ObsidianWorldFormat), false)
            .unwrap();
        registry
    }

    #[test]
    fn test_extension_resolution() {
        let registry = registry();
        assert_eq!(registry.for_extension("gz").unwrap().name(), "raw-gzip");
        assert_eq!(registry.for_extension("GZ").unwrap().name(), "raw-gzip");
        assert_eq!(
            registry.for_extension("obw").unwrap().name(),
            "obsidian-world"
        );
        assert!(matches!(
            registry.for_extension("schematic"),
            Err(FormatError::UnknownExtension(_))
        ));
    }

    #[test]
    fn test_duplicate_format_rejected() {
        let mut registry = registry();
        assert!(registry.register(Arc::new(RawGzipFormat), false).is_err());
        assert!(registry.register(Arc::new(RawGzipFormat), true).is_ok());
    }

    #[test]
    fn test_metadata_codec_validates_known_records() {
        let mut registry = registry();
        registry.register_metadata_codec(
            "obsidian-world",
            "chisel",
            "clickDistance",
            MetadataCodec::validating(|value| {
                value
                    .get("distance")
                    .and_then(Value::as_i64)
                    .map(|_| ())
                    .ok_or_else(|| "missing 'distance'".to_string())
            }),
        );
        let good = json!({"version": 1, "distance": 160});
        assert_eq!(
            registry
                .read_metadata("obsidian-world", "chisel", "clickDistance", good.clone())
                .unwrap(),
            good
        );
        assert!(registry
            .read_metadata("obsidian-world", "chisel", "clickDistance", json!({}))
            .is_err());
        // Unknown records pass through verbatim.
        let alien = json!({"whatever": true});
        assert_eq!(
            registry
                .read_metadata("obsidian-world", "elsewhere", "thing", alien.clone())
                .unwrap(),
            alien
        );
    }
}
