//! Model-system graph: boundaries, structures and links
//!
//! Boundaries own their child boundaries and structures by value, so the
//! boundary tree cannot contain a cycle and each structure belongs to exactly
//! one boundary. Links refer to structures by their model-system-wide
//! [`StructureId`].

use crate::error::ModelError;
use std::collections::{HashMap, HashSet};

/// Model-system-wide structure index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureId(pub usize);

impl std::fmt::Display for StructureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Placement on the authoring canvas. Presentation only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureKind {
    /// Named entry point, backed by the built-in start module.
    Start,
    Module { type_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSystemStructure {
    pub id: StructureId,
    pub name: String,
    pub description: String,
    pub kind: StructureKind,
    /// String-encoded value for the module's declared parameter.
    pub parameter: Option<String>,
    pub location: Point,
    pub disabled: bool,
}

impl ModelSystemStructure {
    pub fn start(id: StructureId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            kind: StructureKind::Start,
            parameter: None,
            location: Point::default(),
            disabled: false,
        }
    }

    pub fn module(id: StructureId, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            kind: StructureKind::Module {
                type_name: type_name.into(),
            },
            parameter: None,
            location: Point::default(),
            disabled: false,
        }
    }

    pub fn with_parameter(mut self, value: impl Into<String>) -> Self {
        self.parameter = Some(value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, StructureKind::Start)
    }
}

/// One destination of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTarget {
    pub structure: StructureId,
    /// Disabled on this link only; the structure itself may still be enabled.
    pub disabled: bool,
}

impl LinkTarget {
    pub fn enabled(structure: StructureId) -> Self {
        Self {
            structure,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTargets {
    Single(LinkTarget),
    Multi(Vec<LinkTarget>),
}

impl LinkTargets {
    pub fn as_slice(&self) -> &[LinkTarget] {
        match self {
            Self::Single(target) => std::slice::from_ref(target),
            Self::Multi(targets) => targets,
        }
    }
}

/// A directed edge from an origin's hook to its destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub origin: StructureId,
    pub hook: String,
    pub targets: LinkTargets,
}

impl Link {
    pub fn single(origin: StructureId, hook: impl Into<String>, destination: StructureId) -> Self {
        Self {
            origin,
            hook: hook.into(),
            targets: LinkTargets::Single(LinkTarget::enabled(destination)),
        }
    }

    pub fn multi(origin: StructureId, hook: impl Into<String>, targets: Vec<LinkTarget>) -> Self {
        Self {
            origin,
            hook: hook.into(),
            targets: LinkTargets::Multi(targets),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Boundary {
    pub name: String,
    pub description: String,
    pub structures: Vec<ModelSystemStructure>,
    pub links: Vec<Link>,
    pub boundaries: Vec<Boundary>,
}

impl Boundary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_structure(mut self, structure: ModelSystemStructure) -> Self {
        self.structures.push(structure);
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundaries.push(boundary);
        self
    }

    pub fn child(&self, name: &str) -> Option<&Boundary> {
        self.boundaries.iter().find(|b| b.name == name)
    }

    pub fn start(&self, name: &str) -> Option<&ModelSystemStructure> {
        self.structures
            .iter()
            .find(|s| s.is_start() && s.name == name)
    }

    pub fn starts(&self) -> impl Iterator<Item = &ModelSystemStructure> {
        self.structures.iter().filter(|s| s.is_start())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSystem {
    pub name: String,
    pub description: String,
    /// The root ("global") boundary.
    pub global: Boundary,
}

impl ModelSystem {
    pub fn new(name: impl Into<String>, global: Boundary) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            global,
        }
    }

    /// Every boundary, parents before children.
    pub fn boundaries(&self) -> Vec<&Boundary> {
        let mut out = Vec::new();
        let mut stack = vec![&self.global];
        while let Some(boundary) = stack.pop() {
            out.push(boundary);
            stack.extend(boundary.boundaries.iter().rev());
        }
        out
    }

    /// Every structure of the model system.
    pub fn structures(&self) -> impl Iterator<Item = &ModelSystemStructure> {
        self.boundaries()
            .into_iter()
            .flat_map(|b| b.structures.iter())
    }

    /// Every link of the model system.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.boundaries().into_iter().flat_map(|b| b.links.iter())
    }

    /// Structures keyed by id.
    pub fn structure_index(&self) -> HashMap<StructureId, &ModelSystemStructure> {
        self.structures().map(|s| (s.id, s)).collect()
    }

    /// Resolve a dotted start path such as `A.B.start1`.
    ///
    /// Every segment but the last names a child boundary, beginning under the
    /// global boundary; the last segment names a start in the final boundary.
    pub fn get_start(&self, path: &str) -> Result<&ModelSystemStructure, ModelError> {
        let mut segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let start_name = segments.pop().unwrap_or_default();
        let mut current = &self.global;
        for segment in segments {
            current = current
                .child(segment)
                .ok_or_else(|| ModelError::BoundaryNotFound {
                    name: segment.to_string(),
                    parent: current.name.clone(),
                })?;
        }
        current.start(start_name).ok_or_else(|| ModelError::StartNotFound {
            name: start_name.to_string(),
            boundary: current.name.clone(),
        })
    }

    /// Check the purely structural invariants that need no module registry:
    /// unique ids, unique names per boundary, links between known structures,
    /// and at most one link per origin hook.
    pub fn check_structure(&self) -> Result<(), ModelError> {
        let mut ids = HashSet::new();
        for boundary in self.boundaries() {
            let mut children = HashSet::new();
            for child in &boundary.boundaries {
                if !children.insert(child.name.as_str()) {
                    return Err(ModelError::load(format!(
                        "boundary '{}' has two child boundaries named '{}'",
                        boundary.name, child.name
                    )));
                }
            }
            let mut names = HashSet::new();
            for s in &boundary.structures {
                if !ids.insert(s.id) {
                    return Err(ModelError::load(format!("duplicate structure index {}", s.id.0)));
                }
                if !names.insert((s.is_start(), s.name.as_str())) {
                    return Err(ModelError::load(format!(
                        "boundary '{}' has two structures named '{}'",
                        boundary.name, s.name
                    )));
                }
            }
        }

        let mut hooks = HashSet::new();
        for link in self.links() {
            if !ids.contains(&link.origin) {
                return Err(ModelError::load(format!(
                    "link '{}' starts at unknown structure index {}",
                    link.hook, link.origin.0
                )));
            }
            for target in link.targets.as_slice() {
                if !ids.contains(&target.structure) {
                    return Err(ModelError::load(format!(
                        "link '{}' points to unknown structure index {}",
                        link.hook, target.structure.0
                    )));
                }
            }
            if !hooks.insert((link.origin, link.hook.as_str())) {
                return Err(ModelError::load(format!(
                    "hook '{}' of structure index {} has more than one link",
                    link.hook, link.origin.0
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> ModelSystem {
        let inner =
            Boundary::new("B").with_structure(ModelSystemStructure::start(StructureId(2), "deep"));
        let a = Boundary::new("A")
            .with_structure(ModelSystemStructure::start(StructureId(1), "start1"))
            .with_boundary(inner);
        let global = Boundary::new("global")
            .with_structure(ModelSystemStructure::start(StructureId(0), "start1"))
            .with_boundary(a);
        ModelSystem::new("ms", global)
    }

    #[test]
    fn get_start_walks_boundaries() {
        let ms = nested();
        assert_eq!(ms.get_start("start1").unwrap().id, StructureId(0));
        assert_eq!(ms.get_start("A.start1").unwrap().id, StructureId(1));
        assert_eq!(ms.get_start("A.B.deep").unwrap().id, StructureId(2));
    }

    #[test]
    fn get_start_names_missing_boundary_and_parent() {
        let ms = ModelSystem::new(
            "ms",
            Boundary::new("global").with_boundary(Boundary::new("A")),
        );
        let err = ms.get_start("A.B.start1").unwrap_err();
        assert_eq!(
            err,
            ModelError::BoundaryNotFound {
                name: "B".into(),
                parent: "A".into()
            }
        );
        assert!(err.to_string().contains("'B'"));
        assert!(err.to_string().contains("'A'"));
    }

    #[test]
    fn get_start_names_missing_start() {
        let err = nested().get_start("A.nope").unwrap_err();
        assert_eq!(
            err,
            ModelError::StartNotFound {
                name: "nope".into(),
                boundary: "A".into()
            }
        );
    }

    #[test]
    fn boundaries_lists_parents_first() {
        let names: Vec<_> = nested().boundaries().iter().map(|b| b.name.clone()).collect();
        assert_eq!(names, vec!["global", "A", "B"]);
    }

    #[test]
    fn check_structure_rejects_duplicate_ids() {
        let ms = ModelSystem::new(
            "ms",
            Boundary::new("global")
                .with_structure(ModelSystemStructure::start(StructureId(0), "a"))
                .with_boundary(
                    Boundary::new("A")
                        .with_structure(ModelSystemStructure::start(StructureId(0), "b")),
                ),
        );
        assert!(matches!(ms.check_structure(), Err(ModelError::Load(_))));
    }

    #[test]
    fn check_structure_rejects_dangling_link() {
        let ms = ModelSystem::new(
            "ms",
            Boundary::new("global")
                .with_structure(ModelSystemStructure::start(StructureId(0), "a"))
                .with_link(Link::single(StructureId(0), "ToExecute", StructureId(9))),
        );
        let err = ms.check_structure().unwrap_err();
        assert!(err.to_string().contains("9"), "{err}");
    }
}
