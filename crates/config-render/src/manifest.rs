//! File manifests
//!
//! The payload of a generated `MachineConfig` is an Ignition-style manifest:
//! a list of files, each with a path and its contents encoded as an
//! RFC 2397 data URL. Contents must survive encode/decode byte for byte.

use crate::error::RenderError;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// Ignition spec version written into every manifest
pub const MANIFEST_VERSION: &str = "3.2.0";

/// Mode applied to generated files (0644)
pub const DEFAULT_FILE_MODE: i32 = 0o644;

const DATA_URL_PREFIX: &str = "data:text/plain;charset=utf-8;base64,";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigManifest {
    pub ignition: ManifestVersion,
    #[serde(default)]
    pub storage: ManifestStorage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestVersion {
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestStorage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ManifestFile>,
}

/// One file entry of a manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    pub path: String,
    #[serde(default)]
    pub contents: FileContents,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A rendered file before it is placed into a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedConfigFile {
    pub path: String,
    pub data: Vec<u8>,
}

impl GeneratedConfigFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

impl Default for ConfigManifest {
    fn default() -> Self {
        Self {
            ignition: ManifestVersion {
                version: MANIFEST_VERSION.to_string(),
            },
            storage: ManifestStorage::default(),
        }
    }
}

impl ConfigManifest {
    /// Build a manifest from rendered files. Files without data are left out.
    pub fn from_files(files: &[GeneratedConfigFile]) -> Self {
        let mut manifest = Self::default();
        for file in files.iter().filter(|f| !f.data.is_empty()) {
            manifest
                .storage
                .files
                .push(ManifestFile::from_bytes(&file.path, &file.data));
        }
        manifest
    }

    /// Serialize into the raw value stored in `MachineConfig.spec.config`
    pub fn to_value(&self) -> Result<serde_json::Value, RenderError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, RenderError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Find a file entry by path
    pub fn file(&self, path: &str) -> Option<&ManifestFile> {
        self.storage.files.iter().find(|f| f.path == path)
    }
}

impl ManifestFile {
    /// File entry overwriting `path` with `data`
    pub fn from_bytes(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            contents: FileContents {
                source: Some(encode_data_url(data)),
            },
            mode: Some(DEFAULT_FILE_MODE),
            overwrite: Some(true),
        }
    }

    /// Decoded file contents
    pub fn decoded_contents(&self) -> Result<Vec<u8>, RenderError> {
        let source = self
            .contents
            .source
            .as_deref()
            .ok_or_else(|| RenderError::EmptySource(self.path.clone()))?;
        decode_data_url(source)
    }

    /// Decoded file contents as UTF-8 text
    pub fn decoded_text(&self) -> Result<String, RenderError> {
        String::from_utf8(self.decoded_contents()?).map_err(|_| RenderError::Utf8 {
            path: self.path.clone(),
        })
    }
}

/// Encode bytes as a base64 data URL
pub fn encode_data_url(data: &[u8]) -> String {
    format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(data))
}

/// Decode a data URL (`data:[<mediatype>][;base64],<data>`)
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, RenderError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| RenderError::Decode(format!("not a data URL: {:.32}", url)))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| RenderError::Decode("data URL has no payload separator".to_string()))?;

    if header.ends_with(";base64") {
        STANDARD
            .decode(payload)
            .map_err(|e| RenderError::Decode(e.to_string()))
    } else {
        Ok(urlencoding::decode_binary(payload.as_bytes()).into_owned())
    }
}
