use std::collections::{HashMap, HashSet};

use smol_str::SmolStr;

use crate::{Compiler, Scc, SccId, SccState, TopId, TopVar};

/// Partition a module's bindings into strongly connected components of
/// the global-reference graph and record each binding's component.
/// Returns the components in reverse topological order (dependencies
/// first), which is the order they must be type-checked in.
pub fn schedule_module(comp: &mut Compiler, module: &SmolStr) -> Vec<SccId> {
    let env = &comp.modules[module];

    // Externs have fixed types and are not nodes of the graph.
    let nodes: Vec<TopId> = env
        .decls
        .iter()
        .copied()
        .filter(|id| matches!(comp.tops[*id], TopVar::El(_)))
        .collect();

    let mut adjacency: HashMap<TopId, Vec<TopId>> = HashMap::new();
    for &id in &nodes {
        let el = comp.el(id);
        let mut succs = Vec::new();
        for name in &el.used_globals {
            if let Some(&target) = env.glob_vars.get(name) {
                if matches!(comp.tops[target], TopVar::El(_)) {
                    succs.push(target);
                }
            }
        }
        adjacency.insert(id, succs);
    }

    let mut tarjan = Tarjan {
        adjacency: &adjacency,
        counter: 0,
        stack: Vec::new(),
        index: HashMap::new(),
        lowlink: HashMap::new(),
        on_stack: HashSet::new(),
        components: Vec::new(),
    };
    for &id in &nodes {
        if !tarjan.index.contains_key(&id) {
            tarjan.connect(id);
        }
    }

    let components = tarjan.components;
    let mut out = Vec::with_capacity(components.len());
    for vars in components {
        let scc_id = comp.sccs.alloc(Scc {
            vars: vars.clone(),
            state: SccState::Untouched,
        });
        for member in vars {
            comp.el_mut(member).scc = Some(scc_id);
        }
        out.push(scc_id);
    }
    out
}

struct Tarjan<'a> {
    adjacency: &'a HashMap<TopId, Vec<TopId>>,
    counter: u32,
    stack: Vec<TopId>,
    index: HashMap<TopId, u32>,
    lowlink: HashMap<TopId, u32>,
    on_stack: HashSet<TopId>,
    components: Vec<Vec<TopId>>,
}

impl Tarjan<'_> {
    fn connect(&mut self, v: TopId) {
        self.index.insert(v, self.counter);
        self.lowlink.insert(v, self.counter);
        self.counter += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        if let Some(succs) = self.adjacency.get(&v) {
            for &w in succs {
                if !self.index.contains_key(&w) {
                    self.connect(w);
                    let low = self.lowlink[&v].min(self.lowlink[&w]);
                    self.lowlink.insert(v, low);
                } else if self.on_stack.contains(&w) {
                    let low = self.lowlink[&v].min(self.index[&w]);
                    self.lowlink.insert(v, low);
                }
            }
        }

        // A node whose lowlink never dropped below its own index roots a
        // component; pop the stack down to it.
        if self.lowlink[&v] == self.index[&v] {
            let mut component = Vec::new();
            loop {
                let w = self.stack.pop().expect("tarjan stack underflow");
                self.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}
