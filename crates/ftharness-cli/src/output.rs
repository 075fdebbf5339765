use serde::Serialize;
use std::fmt::Display;

/// Success output is a line-oriented `key: value` stream on stdout;
/// diagnostics go to stderr only.
pub fn kv(key: &str, value: impl Display) {
    println!("{key}: {value}");
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
