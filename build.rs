fn main() {
    // Tell Cargo to rerun this build script if any test fixture changes
    println!("cargo:rerun-if-changed=tests/fixtures");

    // Also rerun if any individual .wat fixture changes
    let fixture_dir = std::path::Path::new("tests/fixtures");
    if let Ok(entries) = std::fs::read_dir(fixture_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("wat") {
                println!("cargo:rerun-if-changed={}", path.display());
            }
        }
    }
}
