//! Handler dependency graph and scheduling
//!
//! The graph is rebuilt for every convergence pass from the resource's
//! handler list. Ordering is a stable topological sort: handlers with no
//! ordering constraint between them keep their declaration order.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::handler::Handler;

/// Why a handler is (or is not) part of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dirtiness {
    /// Nothing owned by the handler changed and no predecessor is dirty
    Clean,
    /// At least one owned key changed
    Changed,
    /// A transitive predecessor is dirty
    Forced { by: &'static str },
}

impl Dirtiness {
    pub fn is_dirty(&self) -> bool {
        !matches!(self, Self::Clean)
    }
}

/// A validated, ordered view of a handler set
#[derive(Debug, Clone)]
pub struct Schedule {
    names: Vec<&'static str>,
    predecessors: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl Schedule {
    /// Validate `handlers` and compute their execution order.
    ///
    /// Fails on duplicate names, unknown predecessors, keys owned by more
    /// than one handler, and cycles.
    pub fn build<A>(handlers: &[Handler<A>]) -> Result<Self> {
        let mut index: HashMap<&'static str, usize> = HashMap::with_capacity(handlers.len());
        for (i, handler) in handlers.iter().enumerate() {
            if index.insert(handler.name(), i).is_some() {
                return Err(Error::DuplicateHandler(handler.name().to_string()));
            }
        }

        let mut owners: HashMap<&'static str, &'static str> = HashMap::new();
        for handler in handlers {
            for key in handler.keys() {
                if let Some(first) = owners.insert(*key, handler.name())
                    && first != handler.name()
                {
                    return Err(Error::ConflictingOwnership {
                        key: (*key).to_string(),
                        first: first.to_string(),
                        second: handler.name().to_string(),
                    });
                }
            }
        }

        let mut predecessors = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let mut preds = Vec::with_capacity(handler.predecessors().len());
            for name in handler.predecessors() {
                let Some(&p) = index.get(name) else {
                    return Err(Error::UnknownPredecessor {
                        handler: handler.name().to_string(),
                        predecessor: (*name).to_string(),
                    });
                };
                preds.push(p);
            }
            predecessors.push(preds);
        }

        let names: Vec<&'static str> = handlers.iter().map(Handler::name).collect();
        let order = stable_toposort(&names, &predecessors)?;

        Ok(Self {
            names,
            predecessors,
            order,
        })
    }

    /// Handler indices in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Handler names in execution order
    pub fn ordered_names(&self) -> Vec<&'static str> {
        self.order.iter().map(|&i| self.names[i]).collect()
    }

    /// Direct predecessors of handler `i`
    pub fn predecessors(&self, i: usize) -> &[usize] {
        &self.predecessors[i]
    }

    /// Compute per-handler dirtiness.
    ///
    /// `changed[i]` is true when one of handler `i`'s keys differs from the
    /// recorded state. `desired[i]` is true when handler `i` has at least one
    /// owned key with a non-null desired value; a handler with nothing
    /// desired is never forced.
    ///
    /// A dirty handler taints everything reachable through `after` edges,
    /// including across clean intermediate handlers. Missing entries in
    /// either slice count as false.
    pub(crate) fn propagate(&self, changed: &[bool], desired: &[bool]) -> Vec<Dirtiness> {
        let n = self.names.len();
        let mut dirtiness = vec![Dirtiness::Clean; n];
        // Nearest dirty handler at or above each node
        let mut taint: Vec<Option<&'static str>> = vec![None; n];

        for &i in &self.order {
            let inherited = self.predecessors[i].iter().find_map(|&p| taint[p]);

            dirtiness[i] = if changed.get(i) == Some(&true) {
                Dirtiness::Changed
            } else if let Some(by) = inherited
                && desired.get(i) == Some(&true)
            {
                Dirtiness::Forced { by }
            } else {
                Dirtiness::Clean
            };

            taint[i] = if dirtiness[i].is_dirty() {
                Some(self.names[i])
            } else {
                inherited
            };
        }

        dirtiness
    }
}

/// Kahn's algorithm, always taking the lowest ready declaration index.
fn stable_toposort(names: &[&'static str], predecessors: &[Vec<usize>]) -> Result<Vec<usize>> {
    let n = names.len();
    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, preds) in predecessors.iter().enumerate() {
        in_degree[i] = preds.len();
        for &p in preds {
            successors[p].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &s in &successors[i] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.insert(s);
            }
        }
    }

    if order.len() < n {
        let handlers = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| names[i].to_string())
            .collect();
        return Err(Error::Cycle { handlers });
    }

    Ok(order)
}
