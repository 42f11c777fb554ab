//! Security invariant tests for the ingress gateway.
//!
//! Source-level checks over the production crates. They run with every
//! `cargo test --workspace` so a refactor cannot quietly drop one of them.

use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("audit crate lives at <root>/crates/<name>")
        .to_path_buf()
}

/// All production `.rs` files under `crates/`, skipping this crate and `tests/` dirs.
fn production_source_files() -> Vec<(String, String)> {
    let crates_dir = workspace_root().join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("security-audit") {
            continue;
        }
        if path_str.contains("/tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    files
}

/// Everything before the first `#[cfg(test)]`. Test modules sit at the end of
/// each file in this workspace, so the cut is enough.
fn production_lines(content: &str) -> String {
    content
        .lines()
        .take_while(|line| !line.contains("#[cfg(test)]"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_crate_file(relative: &str) -> String {
    let path = workspace_root().join(relative);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

#[test]
fn test_sources_were_found() {
    let files = production_source_files();
    assert!(
        files.iter().any(|(p, _)| p.ends_with("proxy.rs")),
        "audit walked the wrong directory: {:?}",
        files.iter().map(|(p, _)| p).collect::<Vec<_>>()
    );
}

#[test]
fn test_no_hardcoded_tokens_or_secrets() {
    // Signed JWTs start with a base64url `{"` header.
    let jwt = Regex::new(r"eyJ[A-Za-z0-9_-]{8,}\.eyJ[A-Za-z0-9_-]{8,}\.").unwrap();
    let secret_default =
        Regex::new(r#"JWT_(REFRESH_)?SECRET_KEY"\)\s*\.\s*unwrap_or"#).unwrap();

    let mut violations = Vec::new();
    for (path, content) in production_source_files() {
        let prod = production_lines(&content);
        for (i, line) in prod.lines().enumerate() {
            if jwt.is_match(line) || secret_default.is_match(line) {
                violations.push(format!("{path}:{}: {}", i + 1, line.trim()));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "hardcoded token or secret default in production code:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_signing_keys_are_mandatory() {
    let config = production_lines(&read_crate_file("crates/ingress-gateway/src/config.rs"));

    for key in ["JWT_SECRET_KEY", "JWT_REFRESH_SECRET_KEY"] {
        assert!(
            config.contains(&format!("MissingRequired(\"{key}\")")),
            "{key} must be required at startup"
        );
    }
}

#[test]
fn test_http_clients_disable_redirects() {
    // A followed redirect would carry identity headers to a host we never routed to.
    let builder = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let no_redirect = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    let mut violations = Vec::new();
    for (path, content) in production_source_files() {
        let prod = production_lines(&content);
        for m in builder.find_iter(&prod) {
            let window_end = (m.end() + 500).min(prod.len());
            let window = prod.get(m.end()..window_end).unwrap_or(&prod[m.end()..]);
            if !no_redirect.is_match(window) {
                let line = prod[..m.start()].lines().count() + 1;
                violations.push(format!("{path}:{line}"));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "reqwest clients without redirect(Policy::none()):\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_constant_time_uses_subtle_crate() {
    let security = read_crate_file("crates/ingress-auth/src/security.rs");
    assert!(security.contains("use subtle::ConstantTimeEq"));
    assert!(security.contains(".ct_eq("));

    let prod = production_lines(&security);
    let body_start = prod
        .find("pub fn constant_time_eq")
        .expect("constant_time_eq is defined");
    let body = &prod[body_start..];
    let body = &body[..body.find("\n}").unwrap_or(body.len())];
    assert!(
        !body.contains("return false"),
        "constant_time_eq must not exit early:\n{body}"
    );
}

#[test]
fn test_token_validation_pins_algorithm() {
    let token = production_lines(&read_crate_file("crates/ingress-auth/src/token.rs"));
    assert!(token.contains("Validation::new(Algorithm::HS256)"));
    assert!(
        !token.contains("insecure_disable_signature_validation"),
        "signature validation must stay on"
    );
}

#[test]
fn test_secrets_are_redacted_in_debug() {
    for file in [
        "crates/ingress-auth/src/token.rs",
        "crates/ingress-gateway/src/config.rs",
    ] {
        let prod = production_lines(&read_crate_file(file));
        assert!(
            prod.contains("[REDACTED]"),
            "{file} must hand-write a redacting Debug impl"
        );
    }
}

#[test]
fn test_client_identity_headers_are_stripped() {
    let proxy = production_lines(&read_crate_file("crates/ingress-gateway/src/proxy.rs"));

    let start = proxy
        .find("REQUEST_HEADERS_TO_STRIP")
        .expect("proxy declares the stripped request headers");
    let list = &proxy[start..];
    let list = &list[..list.find("];").unwrap_or(list.len())];

    for header in ["USER_ID_HEADER", "USER_ROLE_HEADER", "USER_EMAIL_HEADER"] {
        assert!(
            list.contains(header),
            "{header} must be stripped from client requests"
        );
    }
}

#[test]
fn test_error_responses_do_not_leak_internals() {
    let leak = Regex::new(r#"(?i)"[^"]*(stack trace|RUST_BACKTRACE|panicked at)[^"]*""#).unwrap();

    let mut violations = Vec::new();
    for (path, content) in production_source_files() {
        let prod = production_lines(&content);
        for (i, line) in prod.lines().enumerate() {
            if leak.is_match(line) {
                violations.push(format!("{path}:{}: {}", i + 1, line.trim()));
            }
        }
    }
    assert!(
        violations.is_empty(),
        "error text leaks internals:\n{}",
        violations.join("\n")
    );

    // `details` carries upstream error text and is only set behind the flag.
    let error = production_lines(&read_crate_file("crates/ingress-gateway/src/error.rs"));
    let lines: Vec<&str> = error.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if line.contains(r#"body["details"]"#) {
            let guarded = lines[i.saturating_sub(3)..i]
                .iter()
                .any(|l| l.contains("if expose_details"));
            assert!(guarded, "details set without expose_details guard at line {}", i + 1);
        }
    }
}
