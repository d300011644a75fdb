// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Named tree containers for parameters and submodels.
//!
//! A model maps names onto parameters and child models; the two share one
//! namespace. Registration enforces the ownership rules: each parameter and
//! each model belongs to at most one parent, a model can never contain
//! itself, and attaching an ancestor as a child is rejected.

use crate::parameter::Parameter;
use st_graph::{Error, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

enum Entry {
    Param(Parameter),
    Sub(Model),
}

struct ModelImpl {
    owned: bool,
    entries: BTreeMap<String, Entry>,
}

/// Shared handle to a named tree of parameters and submodels.
#[derive(Clone)]
pub struct Model {
    inner: Rc<RefCell<ModelImpl>>,
}

impl Default for Model {
    fn default() -> Self {
        Model::new()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let params = inner
            .entries
            .values()
            .filter(|e| matches!(e, Entry::Param(_)))
            .count();
        write!(
            f,
            "Model(parameters={}, submodels={})",
            params,
            inner.entries.len() - params
        )
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(Error::InvalidArgument(
            "entry names must be non-empty and must not contain dots",
        ));
    }
    Ok(())
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Model {
        Model {
            inner: Rc::new(RefCell::new(ModelImpl {
                owned: false,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Registers a parameter under `name`.
    ///
    /// Fails when the name is taken by any entry of this model or when the
    /// parameter is already registered into a model.
    pub fn add_parameter(&self, name: &str, param: &Parameter) -> Result<()> {
        check_name(name)?;
        {
            let inner = self.inner.borrow();
            if inner.entries.contains_key(name) {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
        param.mark_owned()?;
        self.inner
            .borrow_mut()
            .entries
            .insert(name.to_string(), Entry::Param(param.clone()));
        Ok(())
    }

    /// Registers a child model under `name`.
    ///
    /// Fails on a taken name, a model that already has a parent, the model
    /// itself, or a child whose subtree already contains this model.
    pub fn add_submodel(&self, name: &str, sub: &Model) -> Result<()> {
        check_name(name)?;
        if Rc::ptr_eq(&self.inner, &sub.inner) {
            return Err(Error::CyclicModel);
        }
        if sub.contains_model(self) {
            return Err(Error::CyclicModel);
        }
        {
            let inner = self.inner.borrow();
            if inner.entries.contains_key(name) {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
        {
            let mut sub_inner = sub.inner.borrow_mut();
            if sub_inner.owned {
                return Err(Error::ModelAlreadyOwned);
            }
            sub_inner.owned = true;
        }
        self.inner
            .borrow_mut()
            .entries
            .insert(name.to_string(), Entry::Sub(sub.clone()));
        Ok(())
    }

    /// Returns whether `other` occurs anywhere in this model's subtree,
    /// including at the root.
    pub fn contains_model(&self, other: &Model) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let inner = self.inner.borrow();
        inner.entries.values().any(|entry| match entry {
            Entry::Sub(sub) => sub.contains_model(other),
            Entry::Param(_) => false,
        })
    }

    /// Looks up a parameter by path; all leading segments name submodels.
    pub fn parameter(&self, path: &[&str]) -> Result<Parameter> {
        let (last, prefix) = path
            .split_last()
            .ok_or(Error::InvalidArgument("parameter paths must be non-empty"))?;
        let scope = self.submodel(prefix)?;
        let inner = scope.inner.borrow();
        match inner.entries.get(*last) {
            Some(Entry::Param(param)) => Ok(param.clone()),
            _ => Err(Error::UnknownName {
                name: last.to_string(),
            }),
        }
    }

    /// Looks up a submodel by path; the empty path is the model itself.
    pub fn submodel(&self, path: &[&str]) -> Result<Model> {
        let mut current = self.clone();
        for segment in path {
            let next = {
                let inner = current.inner.borrow();
                match inner.entries.get(*segment) {
                    Some(Entry::Sub(sub)) => sub.clone(),
                    _ => {
                        return Err(Error::UnknownName {
                            name: segment.to_string(),
                        })
                    }
                }
            };
            current = next;
        }
        Ok(current)
    }

    /// Returns every parameter in the subtree keyed by its dotted path.
    pub fn get_all_parameters(&self) -> BTreeMap<String, Parameter> {
        let mut all = BTreeMap::new();
        self.collect_parameters("", &mut all);
        all
    }

    fn collect_parameters(&self, prefix: &str, all: &mut BTreeMap<String, Parameter>) {
        let inner = self.inner.borrow();
        for (name, entry) in &inner.entries {
            let full = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            match entry {
                Entry::Param(param) => {
                    all.insert(full, param.clone());
                }
                Entry::Sub(sub) => sub.collect_parameters(&full, all),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_graph::{Naive, Shape};

    fn param() -> Parameter {
        Parameter::from_values_on(Naive::with_seed(1), Shape::new(&[2], 1).unwrap(), vec![0.0; 2])
            .unwrap()
    }

    #[test]
    fn names_are_unique_across_both_namespaces() {
        let m = Model::new();
        m.add_parameter("w", &param()).unwrap();
        assert_eq!(
            m.add_parameter("w", &param()).unwrap_err(),
            Error::DuplicateName {
                name: "w".to_string()
            }
        );
        assert_eq!(
            m.add_submodel("w", &Model::new()).unwrap_err(),
            Error::DuplicateName {
                name: "w".to_string()
            }
        );
        let sub = Model::new();
        m.add_submodel("sub", &sub).unwrap();
        assert_eq!(
            m.add_parameter("sub", &param()).unwrap_err(),
            Error::DuplicateName {
                name: "sub".to_string()
            }
        );
    }

    #[test]
    fn parameters_have_one_owner() {
        let m1 = Model::new();
        let m2 = Model::new();
        let p = param();
        m1.add_parameter("w", &p).unwrap();
        assert_eq!(
            m2.add_parameter("w", &p).unwrap_err(),
            Error::ParameterAlreadyOwned
        );
    }

    #[test]
    fn submodels_have_one_parent() {
        let parent1 = Model::new();
        let parent2 = Model::new();
        let child = Model::new();
        parent1.add_submodel("c", &child).unwrap();
        assert_eq!(
            parent2.add_submodel("c", &child).unwrap_err(),
            Error::ModelAlreadyOwned
        );
    }

    #[test]
    fn self_and_ancestor_attachment_is_cyclic() {
        let root = Model::new();
        assert_eq!(root.add_submodel("me", &root).unwrap_err(), Error::CyclicModel);

        let child = Model::new();
        root.add_submodel("child", &child).unwrap();
        assert_eq!(
            child.add_submodel("up", &root).unwrap_err(),
            Error::CyclicModel
        );
    }

    #[test]
    fn dotted_names_and_path_lookup_agree() {
        let root = Model::new();
        let child = Model::new();
        let w = param();
        let cw = param();
        root.add_parameter("w", &w).unwrap();
        child.add_parameter("cw", &cw).unwrap();
        root.add_submodel("sub", &child).unwrap();

        let all = root.get_all_parameters();
        assert_eq!(
            all.keys().cloned().collect::<Vec<_>>(),
            vec!["sub.cw".to_string(), "w".to_string()]
        );
        assert!(all["w"].same_handle(&w));
        assert!(all["sub.cw"].same_handle(&cw));

        assert!(root.parameter(&["sub", "cw"]).unwrap().same_handle(&cw));
        assert!(root
            .submodel(&["sub"])
            .unwrap()
            .parameter(&["cw"])
            .unwrap()
            .same_handle(&cw));
        assert!(root.parameter(&["sub", "missing"]).is_err());
        assert!(root.submodel(&["nope"]).is_err());
    }

    #[test]
    fn entry_names_are_validated() {
        let m = Model::new();
        assert!(m.add_parameter("", &param()).is_err());
        assert!(m.add_parameter("a.b", &param()).is_err());
    }
}
