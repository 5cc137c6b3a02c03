use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

pub type TaskId = String;

/// One step of a run. `after` names task ids or `provides` tokens.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub label: String,
    pub module: String,
    pub after: Vec<String>,
    pub provides: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Plan {
    tasks: BTreeMap<TaskId, Task>,
}

impl Plan {
    pub fn add(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(Error::msg(format!("duplicate task id '{}'", task.id)));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    fn provides_index(&self) -> Result<BTreeMap<&str, &str>> {
        let mut out: BTreeMap<&str, &str> = BTreeMap::new();
        for (id, task) in &self.tasks {
            for p in &task.provides {
                if let Some(existing) = out.insert(p.as_str(), id.as_str()) {
                    return Err(Error::msg(format!(
                        "provide token '{}' is produced by both '{}' and '{}'",
                        p, existing, id
                    )));
                }
            }
        }
        Ok(out)
    }

    // (dependency, dependent) pairs with tokens resolved to task ids.
    fn edges(&self) -> Result<Vec<(&str, &str)>> {
        let provides = self.provides_index()?;
        let mut out = Vec::new();
        for (id, task) in &self.tasks {
            for dep in &task.after {
                let resolved = match self.tasks.get_key_value(dep.as_str()) {
                    Some((k, _)) => Some(k.as_str()),
                    None => provides.get(dep.as_str()).copied(),
                };
                let Some(dep_id) = resolved else {
                    return Err(Error::msg(format!(
                        "task '{}' has unknown dependency '{}'",
                        id, dep
                    )));
                };
                out.push((dep_id, id.as_str()));
            }
        }
        Ok(out)
    }

    /// Dependency order; ties break alphabetically so output is stable.
    pub fn ordered(&self) -> Result<Vec<&Task>> {
        let mut incoming: BTreeMap<&str, usize> =
            self.tasks.keys().map(|k| (k.as_str(), 0)).collect();
        let mut outgoing: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (from, to) in self.edges()? {
            if outgoing.entry(from).or_default().insert(to) {
                *incoming.entry(to).or_default() += 1;
            }
        }

        let mut ready: BTreeSet<&str> = incoming
            .iter()
            .filter_map(|(k, v)| (*v == 0).then_some(*k))
            .collect();
        let mut out: Vec<&Task> = Vec::with_capacity(self.tasks.len());
        while let Some(n) = ready.pop_first() {
            if let Some(task) = self.tasks.get(n) {
                out.push(task);
            }
            for &m in outgoing.get(n).into_iter().flatten() {
                if let Some(slot) = incoming.get_mut(m) {
                    *slot -= 1;
                    if *slot == 0 {
                        ready.insert(m);
                    }
                }
            }
        }

        if out.len() != self.tasks.len() {
            let remaining: Vec<&str> = incoming
                .iter()
                .filter_map(|(k, v)| (*v > 0).then_some(*k))
                .collect();
            return Err(Error::msg(format!(
                "task graph contains a cycle; remaining: {}",
                remaining.join(", ")
            )));
        }
        Ok(out)
    }

    pub fn to_dot(&self) -> Result<String> {
        let mut out = String::from("digraph plan {\n  rankdir=LR;\n");
        for task in self.tasks.values() {
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}\"];\n",
                task.id, task.label, task.module
            ));
        }
        for (from, to) in self.edges()? {
            out.push_str(&format!("  \"{}\" -> \"{}\";\n", from, to));
        }
        out.push_str("}\n");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, after: &[&str], provides: &[&str]) -> Task {
        Task {
            id: id.into(),
            label: id.into(),
            module: "test".into(),
            after: after.iter().map(|s| s.to_string()).collect(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn ids(plan: &Plan) -> Vec<String> {
        plan.ordered()
            .expect("ordered")
            .into_iter()
            .map(|t| t.id.clone())
            .collect()
    }

    #[test]
    fn orders_by_ids_and_tokens() {
        let mut plan = Plan::default();
        plan.add(task("c.build", &["b:ready"], &[])).unwrap();
        plan.add(task("b.check", &["a.detect"], &["b:ready"])).unwrap();
        plan.add(task("a.detect", &[], &[])).unwrap();
        assert_eq!(ids(&plan), ["a.detect", "b.check", "c.build"]);
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let mut plan = Plan::default();
        plan.add(task("y", &["missing"], &[])).unwrap();
        let err = plan.ordered().unwrap_err().to_string();
        assert!(err.contains("unknown dependency 'missing'"), "{err}");
    }

    #[test]
    fn detects_cycles_and_duplicates() {
        let mut plan = Plan::default();
        plan.add(task("a", &["b"], &[])).unwrap();
        plan.add(task("b", &["a"], &[])).unwrap();
        assert!(plan.ordered().unwrap_err().to_string().contains("cycle"));
        assert!(plan.add(task("a", &[], &[])).is_err());
    }

    #[test]
    fn dot_output_lists_edges() {
        let mut plan = Plan::default();
        plan.add(task("a", &[], &[])).unwrap();
        plan.add(task("b", &["a"], &[])).unwrap();
        let dot = plan.to_dot().expect("dot");
        assert!(dot.contains("\"a\" -> \"b\";"), "{dot}");
    }
}
