//! Object paths reported as violation locations.

use wetwire_core::{Location, Workflow};

fn root(workflow: &Workflow) -> &str {
    if workflow.name.is_empty() {
        "workflow"
    } else {
        &workflow.name
    }
}

pub(crate) fn workflow(workflow: &Workflow) -> Location {
    Location::object(root(workflow))
}

pub(crate) fn job(workflow: &Workflow, job_id: &str) -> Location {
    Location::object(format!("{}/{}", root(workflow), job_id))
}

/// `index` is 1-based
pub(crate) fn step(workflow: &Workflow, job_id: &str, index: usize) -> Location {
    Location::object(format!("{}/{}/step {}", root(workflow), job_id, index))
}
