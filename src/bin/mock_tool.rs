//! Mock tool binary for integration testing
//!
//! Stands in for terraform, helm and kubectl. The first argument names the
//! tool being impersonated (set through `[tools.*] args` in the config);
//! every call is appended to `$MOCK_TOOL_LOG` as one JSON line.
//!
//! `MOCK_TOOL_FAIL_ON` makes calls whose command line contains it exit with
//! `MOCK_TOOL_FAIL_CODE` (default 1).

use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;

fn main() {
    let mut args = std::env::args().skip(1);
    let tool = args.next().unwrap_or_else(|| "tool".to_string());
    let argv: Vec<String> = args.collect();
    let line = format!("{} {}", tool, argv.join(" "));

    if let Ok(path) = std::env::var("MOCK_TOOL_LOG") {
        let cwd = std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        let record = json!({ "tool": tool, "argv": argv, "cwd": cwd });
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            writeln!(file, "{}", record).ok();
        }
    }

    if let Ok(pattern) = std::env::var("MOCK_TOOL_FAIL_ON") {
        if !pattern.is_empty() && line.contains(&pattern) {
            let code = std::env::var("MOCK_TOOL_FAIL_CODE")
                .ok()
                .and_then(|c| c.parse().ok())
                .unwrap_or(1);
            eprintln!("Error: mock failure for '{}'", line.trim_end());
            std::process::exit(code);
        }
    }

    match argv.first().map(String::as_str) {
        Some("version") => println!("{} v0.0.0-mock", tool),
        Some("output") => println!("{{}}"),
        _ => println!("mock {} ok", tool),
    }
}
