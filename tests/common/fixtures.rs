use std::path::{Path, PathBuf};

pub const CSS_CASES_DIR: &str = "tests/fixtures/css";
pub const CHAPTER_FIXTURE: &str = "tests/fixtures/xhtml/chapter.xhtml";

/// Case directories holding an `in.css`, sorted by name.
pub fn css_cases() -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(CSS_CASES_DIR) else {
        return Vec::new();
    };
    let mut cases: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join("in.css").is_file())
        .collect();
    cases.sort();
    cases
}

pub fn read_fixture(path: impl AsRef<Path>) -> Vec<u8> {
    let path = path.as_ref();
    std::fs::read(path).unwrap_or_else(|e| panic!("read {}: {}", path.display(), e))
}

pub fn read_fixture_string(path: impl AsRef<Path>) -> String {
    let bytes = read_fixture(path.as_ref());
    String::from_utf8(bytes)
        .unwrap_or_else(|e| panic!("{} is not UTF-8: {}", path.as_ref().display(), e))
}

/// A stylesheet with `rules` distinct class rules.
pub fn synthetic_stylesheet(rules: usize) -> String {
    let mut css = String::with_capacity(rules * 64);
    for i in 0..rules {
        css.push_str(&format!(
            "div.c{i} p.n{i} {{ margin-left: {}px; text-align: center; font-size: 120%; }}\n",
            i % 40
        ));
    }
    css
}
