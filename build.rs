use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use walkdir::WalkDir;

const PREFIX: &str = "\"ARCPICS_";

/// Every complete `"ARCPICS_*"` string literal in `source`, quotes stripped.
fn quoted_env_keys(source: &str) -> impl Iterator<Item = &str> {
    source.match_indices(PREFIX).filter_map(move |(start, _)| {
        let rest = &source[start + 1..];
        let len = rest
            .bytes()
            .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
            .count();
        (len > PREFIX.len() - 1 && rest.as_bytes().get(len) == Some(&b'"')).then(|| &rest[..len])
    })
}

fn scan_sources(root: &Path) -> BTreeSet<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .filter_map(|e| fs::read_to_string(e.path()).ok())
        .flat_map(|content| {
            quoted_env_keys(&content)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn write_allowlist(keys: &BTreeSet<String>) -> io::Result<()> {
    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let mut f = fs::File::create(Path::new(&out_dir).join("arcpics_env_allowlist.rs"))?;
    writeln!(f, "pub const GENERATED_ARCPICS_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in keys {
        writeln!(f, "    {key:?},")?;
    }
    writeln!(f, "];")
}

fn main() {
    let keys = scan_sources(Path::new("src"));
    if let Err(err) = write_allowlist(&keys) {
        panic!("failed to generate ARCPICS env allowlist: {err}");
    }
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
