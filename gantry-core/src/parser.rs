//! Workflow definition parser
//!
//! Turns a YAML workflow document into a [`Workflow`] and checks that it is
//! complete enough to execute.
//!
//! The document is decoded twice: once structurally, to read the keys of
//! `jobs` in declaration order, and once into the typed model. Declaration
//! order is the execution schedule, so a document whose job order cannot be
//! recovered is rejected rather than run in an arbitrary order.
//!
//! Text fields and job names accept any YAML scalar: `run: true` is the
//! command `true`, a job keyed `1:` is the job named "1".

use serde::Deserialize;
use serde_yaml_ng::{Mapping, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::domain::job::Job;
use crate::domain::workflow::Workflow;

/// The input document is not a well-formed workflow
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse workflow: {0}")]
    Syntax(#[from] serde_yaml_ng::Error),

    #[error("workflow document must be a mapping")]
    NotAMapping,

    #[error("'jobs' must be a mapping of job name to job")]
    JobsNotAMapping,

    #[error("job names must be strings, found {0}")]
    InvalidJobName(String),

    #[error("job '{0}' is declared more than once")]
    DuplicateJobName(String),

    #[error("could not recover job declaration order")]
    JobOrderUnrecoverable,
}

/// The workflow is well-formed but cannot be executed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow name is required")]
    MissingName,

    #[error("workflow must have at least one job")]
    NoJobs,

    #[error("job '{job}' must have at least one step")]
    NoSteps { job: String },

    /// `index` is 1-based
    #[error("job '{job}' step {index} is missing a name")]
    StepMissingName { job: String, index: usize },

    #[error("job '{job}' step '{step}' is missing run commands")]
    StepMissingRun { job: String, step: String },

    #[error("job order does not list exactly the declared jobs")]
    JobOrderMismatch,
}

#[derive(Deserialize)]
struct WorkflowDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    jobs: Option<HashMap<String, Job>>,
}

/// Parse a workflow document
///
/// # Example
/// ```
/// use gantry_core::parser::parse_workflow;
///
/// let source = r#"
/// name: demo
/// jobs:
///   test:
///     target: ubuntu
///     steps:
///       - name: unit
///         run: cargo test
///   lint:
///     runs-on: alpine
///     steps:
///       - name: fmt
///         run: cargo fmt --check
/// "#;
///
/// let workflow = parse_workflow(source)?;
/// assert_eq!(workflow.job_order, vec!["test", "lint"]);
/// # Ok::<(), gantry_core::parser::ParseError>(())
/// ```
pub fn parse_workflow(source: &str) -> Result<Workflow, ParseError> {
    let mut document: Value = serde_yaml_ng::from_str(source)?;
    if !document.is_mapping() {
        return Err(ParseError::NotAMapping);
    }

    normalize_scalars(&mut document)?;

    let job_order = recover_job_order(&document)?;

    let parsed: WorkflowDocument = serde_yaml_ng::from_value(document)?;
    let workflow = Workflow {
        name: parsed.name.unwrap_or_default(),
        jobs: parsed.jobs.unwrap_or_default(),
        job_order,
    };

    if !workflow.has_consistent_order() {
        return Err(ParseError::JobOrderUnrecoverable);
    }

    Ok(workflow)
}

/// Reads the keys of the `jobs` mapping in the order they were written
fn recover_job_order(document: &Value) -> Result<Vec<String>, ParseError> {
    let jobs = match document.get("jobs") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Mapping(jobs)) => jobs,
        Some(_) => return Err(ParseError::JobsNotAMapping),
    };

    jobs.iter()
        .map(|(key, _)| match key {
            Value::String(name) => Ok(name.clone()),
            other => Err(ParseError::InvalidJobName(describe(other))),
        })
        .collect()
}

/// Rewrites bool and number scalars in text positions as strings
///
/// Covers the workflow name, job names, job targets and step fields. A null
/// in a text field becomes the empty string. Job names that are not scalars
/// at all are rejected.
fn normalize_scalars(document: &mut Value) -> Result<(), ParseError> {
    if let Some(name) = document.get_mut("name") {
        coerce_to_text(name);
    }

    let jobs = match document.get_mut("jobs") {
        Some(Value::Mapping(jobs)) => jobs,
        _ => return Ok(()),
    };

    let mut renamed = Mapping::with_capacity(jobs.len());
    for (key, mut job) in std::mem::take(jobs) {
        let name = scalar_text(&key).ok_or_else(|| ParseError::InvalidJobName(describe(&key)))?;
        let key = Value::String(name.clone());
        if renamed.contains_key(&key) {
            return Err(ParseError::DuplicateJobName(name));
        }

        for field in ["target", "runs-on", "runs_on"] {
            if let Some(value) = job.get_mut(field) {
                coerce_to_text(value);
            }
        }
        if let Some(Value::Sequence(steps)) = job.get_mut("steps") {
            for step in steps.iter_mut() {
                for field in ["name", "run"] {
                    if let Some(value) = step.get_mut(field) {
                        coerce_to_text(value);
                    }
                }
            }
        }

        renamed.insert(key, job);
    }
    *jobs = renamed;

    Ok(())
}

/// Source text of a plain scalar
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_to_text(value: &mut Value) {
    let text = match &*value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => return,
    };
    *value = Value::String(text);
}

fn describe(value: &Value) -> String {
    serde_yaml_ng::to_string(value)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "a non-scalar key".to_string())
}

/// Validate a parsed workflow
///
/// Rules are checked in order and the first violation is returned:
/// 1. the workflow has a name
/// 2. it declares at least one job
/// 3. every job has at least one step
/// 4. every step has a name and a command
///
/// Jobs are visited in execution order. A final check rejects a job order
/// that does not list exactly the declared jobs.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ValidationError> {
    if workflow.name.trim().is_empty() {
        return Err(ValidationError::MissingName);
    }

    if workflow.jobs.is_empty() {
        return Err(ValidationError::NoJobs);
    }

    for (job_name, job) in jobs_in_validation_order(workflow) {
        if job.steps.is_empty() {
            return Err(ValidationError::NoSteps {
                job: job_name.to_string(),
            });
        }

        for (idx, step) in job.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ValidationError::StepMissingName {
                    job: job_name.to_string(),
                    index: idx + 1,
                });
            }
            if step.run.trim().is_empty() {
                return Err(ValidationError::StepMissingRun {
                    job: job_name.to_string(),
                    step: step.name.clone(),
                });
            }
        }
    }

    if !workflow.has_consistent_order() {
        return Err(ValidationError::JobOrderMismatch);
    }

    Ok(())
}

/// Jobs in execution order, then any job the order forgot, sorted by name
fn jobs_in_validation_order(workflow: &Workflow) -> Vec<(&str, &Job)> {
    let mut visited = HashSet::new();
    let mut jobs: Vec<(&str, &Job)> = workflow
        .ordered_jobs()
        .filter(|(name, _)| visited.insert(*name))
        .collect();

    let mut unordered: Vec<(&str, &Job)> = workflow
        .jobs
        .iter()
        .filter(|(name, _)| !visited.contains(name.as_str()))
        .map(|(name, job)| (name.as_str(), job))
        .collect();
    unordered.sort_by(|a, b| a.0.cmp(b.0));

    jobs.extend(unordered);
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobStatus, Step};

    const DEMO: &str = r#"
name: demo
jobs:
  lint:
    target: ubuntu
    steps:
      - name: check
        run: echo lint
  test:
    target: alpine
    steps:
      - name: unit
        run: echo unit
      - name: integration
        run: |
          echo one
          echo two
"#;

    #[test]
    fn test_parse_valid_workflow() {
        let wf = parse_workflow(DEMO).unwrap();

        assert_eq!(wf.name, "demo");
        assert_eq!(wf.job_order, vec!["lint", "test"]);
        assert_eq!(wf.jobs.len(), 2);
        assert_eq!(wf.jobs["test"].target, "alpine");
        assert_eq!(wf.jobs["test"].steps.len(), 2);
        assert_eq!(wf.jobs["test"].steps[1].run, "echo one\necho two\n");
        assert_eq!(wf.jobs["lint"].status, JobStatus::Pending);
        assert!(validate_workflow(&wf).is_ok());
    }

    #[test]
    fn test_declaration_order_is_preserved() {
        let names = [
            "zulu", "alpha", "mike", "bravo", "yankee", "charlie", "x-ray", "delta", "kilo", "echo",
        ];
        let mut source = String::from("name: ordered\njobs:\n");
        for name in names {
            source.push_str(&format!(
                "  {name}:\n    target: ubuntu\n    steps:\n      - name: s\n        run: echo {name}\n"
            ));
        }

        let wf = parse_workflow(&source).unwrap();
        assert_eq!(wf.job_order, names);

        let mut keys: Vec<&String> = wf.jobs.keys().collect();
        let mut order: Vec<&String> = wf.job_order.iter().collect();
        keys.sort();
        order.sort();
        assert_eq!(keys, order);
    }

    #[test]
    fn test_runs_on_alias() {
        let source = r#"
name: legacy
jobs:
  build:
    runs-on: alpine
    steps:
      - name: make
        run: make
"#;
        let wf = parse_workflow(source).unwrap();
        assert_eq!(wf.jobs["build"].target, "alpine");
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let source = r#"
name: triggers
on:
  push:
    branches: [main]
jobs:
  build:
    target: ubuntu
    steps:
      - name: make
        run: make
"#;
        assert!(parse_workflow(source).is_ok());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_workflow("name: [unclosed");
        assert!(matches!(result, Err(ParseError::Syntax(_))));
    }

    #[test]
    fn test_parse_non_mapping_document() {
        let result = parse_workflow("- just\n- a list\n");
        assert!(matches!(result, Err(ParseError::NotAMapping)));
    }

    #[test]
    fn test_parse_jobs_not_mapping() {
        let result = parse_workflow("name: x\njobs:\n  - build\n");
        assert!(matches!(result, Err(ParseError::JobsNotAMapping)));
    }

    #[test]
    fn test_parse_null_job_name() {
        let source = "name: x\njobs:\n  ~:\n    steps: []\n";
        let result = parse_workflow(source);
        assert!(matches!(result, Err(ParseError::InvalidJobName(_))));
    }

    #[test]
    fn test_numeric_job_name_is_text() {
        let source = r#"
name: numbered
jobs:
  1:
    target: ubuntu
    steps:
      - name: s
        run: echo one
  build:
    target: ubuntu
    steps:
      - name: s
        run: make
"#;
        let wf = parse_workflow(source).unwrap();
        assert_eq!(wf.job_order, vec!["1", "build"]);
        assert_eq!(wf.jobs["1"].steps[0].run, "echo one");
        assert!(validate_workflow(&wf).is_ok());
    }

    #[test]
    fn test_duplicate_job_name_after_coercion() {
        let source = "name: x\njobs:\n  1:\n    steps: []\n  \"1\":\n    steps: []\n";
        let result = parse_workflow(source);
        assert!(matches!(result, Err(ParseError::DuplicateJobName(name)) if name == "1"));
    }

    #[test]
    fn test_scalar_text_fields() {
        let source = r#"
name: 2024
jobs:
  build:
    target: 22.04
    steps:
      - name: 1
        run: true
      - name: off
        run: exit 0
"#;
        let wf = parse_workflow(source).unwrap();
        assert_eq!(wf.name, "2024");

        let build = &wf.jobs["build"];
        assert_eq!(build.target, "22.04");
        assert_eq!(build.steps[0].name, "1");
        assert_eq!(build.steps[0].run, "true");
        assert_eq!(build.steps[1].name, "off");
        assert!(validate_workflow(&wf).is_ok());
    }

    #[test]
    fn test_null_step_field_is_empty() {
        let source = "name: x\njobs:\n  build:\n    steps:\n      - name: s\n        run: ~\n";
        let wf = parse_workflow(source).unwrap();
        assert_eq!(wf.jobs["build"].steps[0].run, "");
        assert!(matches!(
            validate_workflow(&wf),
            Err(ValidationError::StepMissingRun { .. })
        ));
    }

    #[test]
    fn test_missing_jobs_parses_empty() {
        let wf = parse_workflow("name: empty\n").unwrap();
        assert!(wf.jobs.is_empty());
        assert!(wf.job_order.is_empty());
    }

    #[test]
    fn test_validate_missing_name() {
        let wf = parse_workflow("jobs:\n  a:\n    steps:\n      - name: s\n        run: x\n").unwrap();
        assert_eq!(validate_workflow(&wf), Err(ValidationError::MissingName));
    }

    #[test]
    fn test_validate_no_jobs() {
        let wf = parse_workflow("name: empty\njobs: {}\n").unwrap();
        assert_eq!(validate_workflow(&wf), Err(ValidationError::NoJobs));
    }

    #[test]
    fn test_validate_job_without_steps() {
        let wf = parse_workflow("name: x\njobs:\n  build:\n    target: ubuntu\n    steps: []\n")
            .unwrap();
        let err = validate_workflow(&wf).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NoSteps {
                job: "build".to_string()
            }
        );
        assert!(err.to_string().contains("'build'"));
    }

    #[test]
    fn test_validate_step_without_name() {
        let wf = Workflow::new(
            "x",
            vec![(
                "build".to_string(),
                Job::new("ubuntu", vec![Step::new("ok", "true"), Step::new("", "make")]),
            )],
        );
        assert_eq!(
            validate_workflow(&wf),
            Err(ValidationError::StepMissingName {
                job: "build".to_string(),
                index: 2
            })
        );
    }

    #[test]
    fn test_validate_step_without_run() {
        let wf = Workflow::new(
            "x",
            vec![(
                "build".to_string(),
                Job::new("ubuntu", vec![Step::new("compile", "   ")]),
            )],
        );
        let err = validate_workflow(&wf).unwrap_err();
        assert_eq!(
            err,
            ValidationError::StepMissingRun {
                job: "build".to_string(),
                step: "compile".to_string()
            }
        );
        assert!(err.to_string().contains("'compile'"));
    }

    #[test]
    fn test_validate_first_violation_follows_job_order() {
        let wf = Workflow::new(
            "x",
            vec![
                ("second".to_string(), Job::new("ubuntu", vec![])),
                (
                    "first".to_string(),
                    Job::new("ubuntu", vec![Step::new("", "true")]),
                ),
            ],
        );
        assert_eq!(
            validate_workflow(&wf),
            Err(ValidationError::NoSteps {
                job: "second".to_string()
            })
        );
    }

    #[test]
    fn test_validate_name_checked_before_jobs() {
        let wf = Workflow::new("", vec![]);
        assert_eq!(validate_workflow(&wf), Err(ValidationError::MissingName));
    }

    #[test]
    fn test_validate_job_order_mismatch() {
        let mut wf = Workflow::new(
            "x",
            vec![(
                "build".to_string(),
                Job::new("ubuntu", vec![Step::new("s", "true")]),
            )],
        );
        wf.job_order.clear();
        assert_eq!(validate_workflow(&wf), Err(ValidationError::JobOrderMismatch));
    }
}
