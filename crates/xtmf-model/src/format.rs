//! Model-system file format
//!
//! A model system travels as UTF-16LE encoded JSON. Structure `Index` values
//! are unique across the whole model system and are what links refer to.

use crate::error::ModelError;
use crate::graph::{
    Boundary, Link, LinkTarget, LinkTargets, ModelSystem, ModelSystemStructure, Point,
    StructureId, StructureKind,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModelSystemFile {
    name: String,
    #[serde(default)]
    description: String,
    boundary: BoundaryFile,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BoundaryFile {
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default)]
    starts: Vec<StartFile>,
    #[serde(default)]
    modules: Vec<ModuleFile>,
    #[serde(default)]
    links: Vec<LinkFile>,
    #[serde(default)]
    boundaries: Vec<BoundaryFile>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartFile {
    name: String,
    index: usize,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModuleFile {
    name: String,
    index: usize,
    #[serde(rename = "Type")]
    type_name: String,
    #[serde(
        default,
        deserialize_with = "parameter_text",
        skip_serializing_if = "Option::is_none"
    )]
    parameter: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LinkFile {
    origin: usize,
    hook: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destinations: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    disabled_destinations: Vec<usize>,
    /// Disables every destination of the link.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    disabled: bool,
}

/// Parameters are text; numbers and booleans are accepted and kept as written.
fn parameter_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Parse a model system from its JSON text and check its structure.
pub fn from_json(text: &str) -> Result<ModelSystem, ModelError> {
    let file: ModelSystemFile = serde_json::from_str(text)
        .map_err(|e| ModelError::load(format!("invalid model system file: {}", e)))?;
    let model_system = ModelSystem {
        name: file.name,
        description: file.description,
        global: boundary_from_file(file.boundary)?,
    };
    model_system.check_structure()?;
    Ok(model_system)
}

pub fn to_json(model_system: &ModelSystem) -> Result<String, ModelError> {
    let file = ModelSystemFile {
        name: model_system.name.clone(),
        description: model_system.description.clone(),
        boundary: boundary_to_file(&model_system.global),
    };
    serde_json::to_string_pretty(&file)
        .map_err(|e| ModelError::load(format!("unable to write model system: {}", e)))
}

/// Decode the wire form of a model system into a graph.
pub fn load(bytes: &[u8]) -> Result<ModelSystem, ModelError> {
    let text = decode_utf16le(bytes)?;
    from_json(&text)
}

/// Encode a graph into its wire form.
pub fn save(model_system: &ModelSystem) -> Result<Vec<u8>, ModelError> {
    to_json(model_system).map(|text| encode_utf16le(&text))
}

/// Decode UTF-16LE text. Empty or whitespace-only text, an odd byte count and
/// unpaired surrogates are all rejected. A leading byte order mark is dropped.
pub fn decode_utf16le(bytes: &[u8]) -> Result<String, ModelError> {
    let unconvertible = || ModelError::load("unable to convert model system data");
    if bytes.len() % 2 != 0 {
        return Err(unconvertible());
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    let text = char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| unconvertible())?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    if text.trim().is_empty() {
        return Err(unconvertible());
    }
    Ok(text.to_string())
}

pub fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn boundary_from_file(file: BoundaryFile) -> Result<Boundary, ModelError> {
    let mut structures = Vec::with_capacity(file.starts.len() + file.modules.len());
    for start in file.starts {
        structures.push(ModelSystemStructure {
            id: StructureId(start.index),
            name: start.name,
            description: start.description,
            kind: StructureKind::Start,
            parameter: None,
            location: Point {
                x: start.x,
                y: start.y,
            },
            disabled: false,
        });
    }
    for module in file.modules {
        structures.push(ModelSystemStructure {
            id: StructureId(module.index),
            name: module.name,
            description: module.description,
            kind: StructureKind::Module {
                type_name: module.type_name,
            },
            parameter: module.parameter,
            location: Point {
                x: module.x,
                y: module.y,
            },
            disabled: module.disabled,
        });
    }

    let links = file
        .links
        .into_iter()
        .map(link_from_file)
        .collect::<Result<Vec<_>, _>>()?;
    let boundaries = file
        .boundaries
        .into_iter()
        .map(boundary_from_file)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Boundary {
        name: file.name,
        description: file.description,
        structures,
        links,
        boundaries,
    })
}

fn link_from_file(file: LinkFile) -> Result<Link, ModelError> {
    let disabled: HashSet<usize> = file.disabled_destinations.iter().copied().collect();
    let target = |index: usize| LinkTarget {
        structure: StructureId(index),
        disabled: file.disabled || disabled.contains(&index),
    };
    let targets = match (file.destination, &file.destinations) {
        (Some(index), None) => LinkTargets::Single(target(index)),
        (None, Some(indices)) => LinkTargets::Multi(indices.iter().map(|&i| target(i)).collect()),
        (Some(_), Some(_)) => {
            return Err(ModelError::load(format!(
                "link '{}' from index {} has both a destination and destinations",
                file.hook, file.origin
            )))
        }
        (None, None) => {
            return Err(ModelError::load(format!(
                "link '{}' from index {} has no destination",
                file.hook, file.origin
            )))
        }
    };
    Ok(Link {
        origin: StructureId(file.origin),
        hook: file.hook,
        targets,
    })
}

fn boundary_to_file(boundary: &Boundary) -> BoundaryFile {
    let mut starts = Vec::new();
    let mut modules = Vec::new();
    for s in &boundary.structures {
        match &s.kind {
            StructureKind::Start => starts.push(StartFile {
                name: s.name.clone(),
                index: s.id.0,
                x: s.location.x,
                y: s.location.y,
                description: s.description.clone(),
            }),
            StructureKind::Module { type_name } => modules.push(ModuleFile {
                name: s.name.clone(),
                index: s.id.0,
                type_name: type_name.clone(),
                parameter: s.parameter.clone(),
                disabled: s.disabled,
                x: s.location.x,
                y: s.location.y,
                description: s.description.clone(),
            }),
        }
    }

    let links = boundary
        .links
        .iter()
        .map(|link| match &link.targets {
            LinkTargets::Single(target) => LinkFile {
                origin: link.origin.0,
                hook: link.hook.clone(),
                destination: Some(target.structure.0),
                destinations: None,
                disabled_destinations: Vec::new(),
                disabled: target.disabled,
            },
            LinkTargets::Multi(targets) => LinkFile {
                origin: link.origin.0,
                hook: link.hook.clone(),
                destination: None,
                destinations: Some(targets.iter().map(|t| t.structure.0).collect()),
                disabled_destinations: targets
                    .iter()
                    .filter(|t| t.disabled)
                    .map(|t| t.structure.0)
                    .collect(),
                disabled: false,
            },
        })
        .collect();

    BoundaryFile {
        name: boundary.name.clone(),
        description: boundary.description.clone(),
        starts,
        modules,
        links,
        boundaries: boundary.boundaries.iter().map(boundary_to_file).collect(),
    }
}
