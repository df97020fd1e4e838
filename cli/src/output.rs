use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::Write;

/// Pretty JSON on stdout. Empty objects become `{"success":true}`.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let value = serde_json::to_value(value).context("Failed to serialize output")?;
    if value.as_object().is_some_and(|o| o.is_empty()) {
        println!("{}", r#"{"success":true}"#);
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

/// One compact JSON document per line, flushed immediately.
pub fn print_line<T: Serialize>(value: &T) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, value).context("Failed to serialize output")?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// `--json` argument: inline JSON, or `@path` to read a file.
pub fn parse_json_arg(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?
        }
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Invalid JSON payload")
}

/// `KEY=VALUE` pair for `--env`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}
