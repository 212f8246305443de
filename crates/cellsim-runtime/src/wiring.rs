//! Topology wiring - binds process ports to state tree paths.
//!
//! Built once at assembly from the process port declarations, the topology
//! and the state schema. After [`Wiring::build`] succeeds every declared port
//! resolves, every bound path exists, and every shape matches; nothing is
//! checked again at tick time.

use cellsim_core::config::Topology;
use cellsim_core::error::AssemblyError;
use cellsim_core::path::StatePath;
use cellsim_core::process::{PortSpec, Ports};
use cellsim_core::tree::StateTree;
use cellsim_core::types::ProcessId;
use std::collections::BTreeMap;

/// A process's declared ports, as seen by the wiring layer.
#[derive(Debug, Clone)]
pub struct PortDeclaration {
    pub id: ProcessId,
    pub ports: Vec<PortSpec>,
}

/// Bidirectional index between ports and paths.
#[derive(Debug, Clone, Default)]
pub struct Wiring {
    index: BTreeMap<ProcessId, usize>,
    bindings: Vec<BTreeMap<String, StatePath>>,
    specs: Vec<BTreeMap<String, PortSpec>>,
    by_path: BTreeMap<StatePath, Vec<(usize, String)>>,
}

impl Wiring {
    /// Validate the topology against the declarations and the schema.
    ///
    /// Processes keep the position they have in `declarations`.
    pub fn build(
        declarations: &[PortDeclaration],
        topology: &Topology,
        schema: &StateTree,
    ) -> Result<Self, AssemblyError> {
        let mut wiring = Wiring::default();

        for (idx, decl) in declarations.iter().enumerate() {
            if wiring.index.insert(decl.id.clone(), idx).is_some() {
                return Err(AssemblyError::DuplicateProcess(decl.id.clone()));
            }
        }
        if let Some(unknown) = topology.keys().find(|id| !wiring.index.contains_key(*id)) {
            return Err(AssemblyError::UnknownProcess(unknown.clone()));
        }

        let empty = BTreeMap::new();
        for decl in declarations {
            let bound = topology.get(&decl.id).unwrap_or(&empty);
            let specs: BTreeMap<String, PortSpec> = decl
                .ports
                .iter()
                .map(|spec| (spec.name.clone(), spec.clone()))
                .collect();

            if let Some(port) = bound.keys().find(|port| !specs.contains_key(*port)) {
                return Err(AssemblyError::UndeclaredPort {
                    process: decl.id.clone(),
                    port: port.clone(),
                });
            }

            let mut bindings = BTreeMap::new();
            for (name, spec) in &specs {
                let path = bound.get(name).ok_or_else(|| AssemblyError::UnboundPort {
                    process: decl.id.clone(),
                    port: name.clone(),
                })?;
                let found = schema
                    .shape_at(path)
                    .ok_or_else(|| AssemblyError::MissingPath {
                        process: decl.id.clone(),
                        port: name.clone(),
                        path: path.clone(),
                    })?;
                if !spec.shape.accepts(found) {
                    return Err(AssemblyError::ShapeMismatch {
                        process: decl.id.clone(),
                        port: name.clone(),
                        path: path.clone(),
                        expected: spec.shape,
                        found,
                    });
                }
                bindings.insert(name.clone(), path.clone());
            }

            let idx = wiring.bindings.len();
            for (port, path) in &bindings {
                wiring
                    .by_path
                    .entry(path.clone())
                    .or_default()
                    .push((idx, port.clone()));
            }
            wiring.bindings.push(bindings);
            wiring.specs.push(specs);
        }

        Ok(wiring)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn index_of(&self, id: &ProcessId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The path behind `port` of process `id`.
    pub fn resolve(&self, id: &ProcessId, port: &str) -> Option<&StatePath> {
        self.index_of(id)
            .and_then(|idx| self.bindings[idx].get(port))
    }

    /// Port → path for the process at `idx`.
    pub fn bindings(&self, idx: usize) -> &BTreeMap<String, StatePath> {
        &self.bindings[idx]
    }

    pub fn spec(&self, idx: usize, port: &str) -> Option<&PortSpec> {
        self.specs[idx].get(port)
    }

    pub fn specs(&self, idx: usize) -> impl Iterator<Item = &PortSpec> {
        self.specs[idx].values()
    }

    /// A read-only view of `tree` restricted to the process's ports.
    pub fn views<'a>(&'a self, idx: usize, tree: &'a StateTree) -> Ports<'a> {
        Ports::new(tree, &self.bindings[idx])
    }

    /// Every `(process index, port)` bound exactly to `path`.
    pub fn ports_at(&self, path: &StatePath) -> &[(usize, String)] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All bound paths, in key order.
    pub fn paths(&self) -> impl Iterator<Item = &StatePath> {
        self.by_path.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsim_core::tree::LeafDecl;
    use cellsim_core::value::{Shape, Value};

    fn schema() -> StateTree {
        StateTree::from_leaves(&[
            LeafDecl::new("bulk/glc", Value::Count(10)),
            LeafDecl::new("mass", Value::Real(1.0)),
        ])
        .unwrap()
    }

    fn decl(id: &str, ports: Vec<PortSpec>) -> PortDeclaration {
        PortDeclaration {
            id: ProcessId::new(id),
            ports,
        }
    }

    fn topology(entries: &[(&str, &str, &str)]) -> Topology {
        let mut topology = Topology::new();
        for (process, port, path) in entries {
            topology
                .entry(ProcessId::new(*process))
                .or_default()
                .insert(port.to_string(), StatePath::parse(path));
        }
        topology
    }

    #[test]
    fn aliased_ports_share_a_path() {
        let decls = vec![
            decl("a", vec![PortSpec::write("out", Shape::Count)]),
            decl("b", vec![PortSpec::read("in", Shape::Number)]),
        ];
        let topo = topology(&[("a", "out", "bulk/glc"), ("b", "in", "bulk/glc")]);
        let wiring = Wiring::build(&decls, &topo, &schema()).unwrap();

        assert_eq!(
            wiring.resolve(&ProcessId::new("b"), "in"),
            Some(&StatePath::parse("bulk/glc"))
        );
        assert_eq!(wiring.ports_at(&StatePath::parse("bulk/glc")).len(), 2);
    }

    #[test]
    fn rejects_unbound_and_undeclared_ports() {
        let decls = vec![decl("a", vec![PortSpec::read("x", Shape::Any)])];
        let err = Wiring::build(&decls, &Topology::new(), &schema()).unwrap_err();
        assert!(matches!(err, AssemblyError::UnboundPort { .. }));

        let topo = topology(&[("a", "x", "mass"), ("a", "y", "mass")]);
        let err = Wiring::build(&decls, &topo, &schema()).unwrap_err();
        assert!(matches!(err, AssemblyError::UndeclaredPort { .. }));
    }

    #[test]
    fn rejects_unknown_process_duplicates_missing_paths_and_shapes() {
        let decls = vec![decl("a", vec![PortSpec::read("x", Shape::Count)])];

        let topo = topology(&[("ghost", "x", "mass")]);
        assert!(matches!(
            Wiring::build(&decls, &topo, &schema()),
            Err(AssemblyError::UnknownProcess(_))
        ));

        let dup = vec![decls[0].clone(), decls[0].clone()];
        assert!(matches!(
            Wiring::build(&dup, &Topology::new(), &schema()),
            Err(AssemblyError::DuplicateProcess(_))
        ));

        let topo = topology(&[("a", "x", "bulk/nope")]);
        assert!(matches!(
            Wiring::build(&decls, &topo, &schema()),
            Err(AssemblyError::MissingPath { .. })
        ));

        let topo = topology(&[("a", "x", "mass")]);
        assert!(matches!(
            Wiring::build(&decls, &topo, &schema()),
            Err(AssemblyError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn views_are_restricted_to_bound_ports() {
        let decls = vec![decl("a", vec![PortSpec::read("m", Shape::Real)])];
        let topo = topology(&[("a", "m", "mass")]);
        let tree = schema();
        let wiring = Wiring::build(&decls, &topo, &tree).unwrap();
        let ports = wiring.views(0, &tree);
        assert_eq!(ports.real("m").unwrap(), 1.0);
        assert!(ports.value("glc").is_err());
    }
}
