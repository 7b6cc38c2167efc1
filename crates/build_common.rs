// Shared build script helper: copies a crate's README.md into OUT_DIR so it
// can be used as the crate-level rustdoc.
// Include this in build.rs files with: include!("../build_common.rs");
//
// Required imports in the including file:
//   use std::env;
//   use std::fs;
//   use std::path::Path;

/// Rewrite README links for rustdoc and write `README_GENERATED.md` to `OUT_DIR`.
///
/// Links into `src/*.rs` become module links; links to the workspace README
/// become links to the repository URL declared in the workspace manifest.
fn process_readme_for_rustdoc(crate_dir: &str) {
    println!("cargo:rerun-if-changed=README.md");
    println!("cargo:rerun-if-changed=../../Cargo.toml");

    let content = fs::read_to_string(Path::new(crate_dir).join("README.md")).unwrap_or_default();

    let mut rustdoc_content = content.replace("](src/", "](").replace(".rs)", ")");
    if let Some(url) = workspace_repo_url(crate_dir) {
        rustdoc_content = rustdoc_content.replace("](../../README.md", &format!("]({url}"));
    }

    let out_dir = env::var("OUT_DIR").unwrap();
    fs::write(Path::new(&out_dir).join("README_GENERATED.md"), rustdoc_content).unwrap();
}

/// `repository = "..."` from the workspace Cargo.toml, if present.
fn workspace_repo_url(crate_dir: &str) -> Option<String> {
    let manifest = Path::new(crate_dir).parent()?.parent()?.join("Cargo.toml");
    let content = fs::read_to_string(manifest).ok()?;

    content.lines().map(str::trim).find_map(|line| {
        let value = line.strip_prefix("repository")?.trim_start().strip_prefix('=')?;
        Some(value.trim().trim_matches('"').to_string())
    })
}
