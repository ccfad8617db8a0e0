//! Helpers shared by unit tests

use crate::process::WorkerSpec;

/// Spec for the shell worker in `testdata/` exposing the given tools
pub(crate) fn fake_worker(name: &str, tools: &[&str]) -> WorkerSpec {
    let script = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/fake_worker.sh");
    let mut args = vec![script.to_string(), name.to_string()];
    args.extend(tools.iter().map(|t| t.to_string()));
    WorkerSpec::new(name, "sh").with_args(args)
}
