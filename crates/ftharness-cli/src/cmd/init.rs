use crate::output::kv;
use ftharness_core::{engine, paths};
use std::path::Path;

pub fn run(root: &Path, strict: bool, manifest: Option<&Path>) -> anyhow::Result<()> {
    engine::initialize_harness(root, strict, manifest)?;
    kv("harness", paths::harness_dir(root).display());
    kv("index", paths::index_path(root).display());
    kv("config", paths::config_path(root).display());
    Ok(())
}
