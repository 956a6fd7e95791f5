//! Catalog of emulated radio models
//!
//! A [`ModelDefinition`] describes what a radio reports about itself: its
//! protocol, identification bytes and the ROM content the CPS reads before
//! writing. Firmware variants may override identification and ROM.
//!
//! Catalogs are JSON documents:
//!
//! ```json
//! {
//!   "models": [{
//!     "id": "d878uv",
//!     "name": "AT-D878UV",
//!     "manufacturer": "AnyTone",
//!     "protocol": "AnyTone",
//!     "model_id": "38 37 38 55 56 00",
//!     "revision": "56 31 30 30 00 00",
//!     "rom": [{ "address": 256, "data": "61 62 63" }]
//!   }]
//! }
//! ```

use std::fmt::Write as _;
use std::path::Path;

use cp_protocol::Protocol;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CatalogError;
use crate::rom::ModelRom;

/// Byte string stored as space separated hex in catalog documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    /// Parse hex digits, ignoring whitespace between bytes
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(CatalogError::InvalidHex(text.to_string()));
        }
        digits
            .chunks(2)
            .map(|pair| {
                let hi = pair[0].to_digit(16);
                let lo = pair[1].to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                    _ => Err(CatalogError::InvalidHex(text.to_string())),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(HexBytes)
    }
}

impl TryFrom<String> for HexBytes {
    type Error = CatalogError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        HexBytes::parse(&text)
    }
}

impl From<HexBytes> for String {
    fn from(bytes: HexBytes) -> Self {
        let mut out = String::with_capacity(bytes.0.len() * 3);
        for (i, b) in bytes.0.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:02x}", b);
        }
        out
    }
}

impl From<&[u8]> for HexBytes {
    fn from(bytes: &[u8]) -> Self {
        HexBytes(bytes.to_vec())
    }
}

/// Firmware variant of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareDefinition {
    pub name: String,
    #[serde(default)]
    pub released: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model_id: Option<HexBytes>,
    #[serde(default)]
    pub band: Option<u8>,
    #[serde(default)]
    pub revision: Option<HexBytes>,
    #[serde(default)]
    pub rom: ModelRom,
}

/// A radio model that can be emulated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Catalog key
    pub id: String,
    pub name: String,
    pub manufacturer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    pub protocol: Protocol,
    /// Identification reported to the CPS
    #[serde(default)]
    pub model_id: HexBytes,
    #[serde(default)]
    pub band: u8,
    #[serde(default)]
    pub revision: HexBytes,
    #[serde(default)]
    pub rom: ModelRom,
    #[serde(default)]
    pub firmwares: Vec<FirmwareDefinition>,
}

/// Everything a device needs to impersonate one model and firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    pub protocol: Protocol,
    pub model_id: Vec<u8>,
    pub band: u8,
    pub revision: Vec<u8>,
    pub rom: ModelRom,
}

impl ModelDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            manufacturer: String::new(),
            description: String::new(),
            url: None,
            protocol,
            model_id: HexBytes::default(),
            band: 0,
            revision: HexBytes::default(),
            rom: ModelRom::new(),
            firmwares: Vec::new(),
        }
    }

    pub fn firmware(&self, name: &str) -> Option<&FirmwareDefinition> {
        self.firmwares.iter().find(|f| f.name == name)
    }

    /// Resolve the profile for `firmware`, or for the bare model if `None`.
    /// Firmware fields fall back to the model's; firmware ROM overlays the
    /// model ROM.
    pub fn profile(&self, firmware: Option<&str>) -> Result<DeviceProfile, CatalogError> {
        let mut profile = DeviceProfile {
            name: self.name.clone(),
            protocol: self.protocol,
            model_id: self.model_id.0.clone(),
            band: self.band,
            revision: self.revision.0.clone(),
            rom: self.rom.clone(),
        };

        if let Some(name) = firmware {
            let fw = self
                .firmware(name)
                .ok_or_else(|| CatalogError::UnknownFirmware {
                    model: self.id.clone(),
                    firmware: name.to_string(),
                })?;
            profile.name = format!("{} ({})", self.name, fw.name);
            if let Some(model_id) = &fw.model_id {
                profile.model_id = model_id.0.clone();
            }
            if let Some(band) = fw.band {
                profile.band = band;
            }
            if let Some(revision) = &fw.revision {
                profile.revision = revision.0.clone();
            }
            profile.rom.merge(&fw.rom);
        }

        Ok(profile)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    models: Vec<ModelDefinition>,
}

/// Collection of model definitions, keyed by id
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelDefinition>,
}

/// Identification block returned by OpenGD77 firmware info reads
const OPENGD77_FIRMWARE_INFO_LEN: usize = 46;

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the models supported out of the box
    pub fn builtin() -> Self {
        let mut d878uv = ModelDefinition::new("d878uv", "AT-D878UV", Protocol::AnyTone);
        d878uv.manufacturer = "AnyTone".into();
        d878uv.description = "DMR/FM dual band handheld".into();
        d878uv.model_id = HexBytes(b"878UV\0".to_vec());
        d878uv.revision = HexBytes(b"V100\0\0".to_vec());

        let mut d878uv2 = ModelDefinition::new("d878uv2", "AT-D878UVII", Protocol::AnyTone);
        d878uv2.manufacturer = "AnyTone".into();
        d878uv2.description = "DMR/FM dual band handheld".into();
        d878uv2.model_id = HexBytes(b"878UV2".to_vec());
        d878uv2.revision = HexBytes(b"V100\0\0".to_vec());

        let mut rt4d = ModelDefinition::new("rt4d", "RT-4D", Protocol::Radtel);
        rt4d.manufacturer = "Radtel".into();
        rt4d.description = "DMR/FM dual band handheld".into();

        let mut gd77 = ModelDefinition::new("gd77", "GD-77", Protocol::OpenGd77);
        gd77.manufacturer = "Radioddity".into();
        gd77.description = "GD-77 running the OpenGD77 firmware".into();
        gd77.url = Some("https://www.opengd77.com".into());
        let mut info = b"OpenGD77".to_vec();
        info.resize(OPENGD77_FIRMWARE_INFO_LEN, 0);
        gd77.rom.write(0x0200_0000, &info);

        let mut md32uv = ModelDefinition::new("md32uv", "MD-32UV", Protocol::Md32Uv);
        md32uv.manufacturer = "TYT".into();
        md32uv.description = "DMR/FM dual band handheld, sold as Retevis DP570UV".into();
        md32uv.model_id = HexBytes(b"DP570UV".to_vec());

        Self {
            models: vec![d878uv, d878uv2, rt4d, gd77, md32uv],
        }
    }

    /// Parse a JSON catalog document
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for model in doc.models {
            catalog.add(model)?;
        }
        Ok(catalog)
    }

    /// Load a JSON catalog file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let catalog = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!("Loaded {} models from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn to_json(&self) -> Result<String, CatalogError> {
        let doc = CatalogDocument {
            models: self.models.clone(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    pub fn add(&mut self, model: ModelDefinition) -> Result<(), CatalogError> {
        if self.by_id(&model.id).is_some() {
            return Err(CatalogError::DuplicateModel(model.id));
        }
        self.models.push(model);
        Ok(())
    }

    /// Add every model of `other`, replacing models with the same id
    pub fn extend(&mut self, other: ModelCatalog) {
        for model in other.models {
            match self.models.iter_mut().find(|m| m.id == model.id) {
                Some(existing) => *existing = model,
                None => self.models.push(model),
            }
        }
    }

    pub fn by_id(&self, id: &str) -> Option<&ModelDefinition> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn models_for_protocol(&self, protocol: Protocol) -> impl Iterator<Item = &ModelDefinition> {
        self.models.iter().filter(move |m| m.protocol == protocol)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelDefinition> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
