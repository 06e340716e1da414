//! Workflow domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::job::Job;

/// Stored, reusable pipeline definition
///
/// `job_order` is the execution schedule: a permutation of the keys of
/// `jobs` in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub jobs: HashMap<String, Job>,
    #[serde(default)]
    pub job_order: Vec<String>,
}

impl Workflow {
    /// Builds a workflow from jobs given in execution order
    pub fn new(name: impl Into<String>, jobs: Vec<(String, Job)>) -> Self {
        let job_order = jobs.iter().map(|(name, _)| name.clone()).collect();
        Self {
            name: name.into(),
            jobs: jobs.into_iter().collect(),
            job_order,
        }
    }

    /// Iterates jobs in execution order
    ///
    /// Names in `job_order` without a matching job are skipped.
    pub fn ordered_jobs(&self) -> impl Iterator<Item = (&str, &Job)> {
        self.job_order
            .iter()
            .filter_map(|name| self.jobs.get(name).map(|job| (name.as_str(), job)))
    }

    /// True when `job_order` and `jobs` name exactly the same set of jobs
    pub fn has_consistent_order(&self) -> bool {
        if self.job_order.len() != self.jobs.len() {
            return false;
        }
        let mut seen = std::collections::HashSet::with_capacity(self.job_order.len());
        self.job_order
            .iter()
            .all(|name| self.jobs.contains_key(name) && seen.insert(name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::Step;

    fn job() -> Job {
        Job::new("ubuntu", vec![Step::new("s", "true")])
    }

    #[test]
    fn test_new_keeps_given_order() {
        let wf = Workflow::new(
            "demo",
            vec![
                ("zeta".to_string(), job()),
                ("alpha".to_string(), job()),
                ("mid".to_string(), job()),
            ],
        );

        assert_eq!(wf.job_order, vec!["zeta", "alpha", "mid"]);
        let names: Vec<&str> = wf.ordered_jobs().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert!(wf.has_consistent_order());
    }

    #[test]
    fn test_inconsistent_order_detected() {
        let mut wf = Workflow::new("demo", vec![("a".to_string(), job())]);
        wf.job_order.push("ghost".to_string());
        assert!(!wf.has_consistent_order());

        wf.job_order = vec!["a".to_string(), "a".to_string()];
        wf.jobs.insert("b".to_string(), job());
        assert!(!wf.has_consistent_order());
    }
}
