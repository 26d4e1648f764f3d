//! DHAT heap profiler for epub-cascade.
//!
//! Profiles allocation patterns of the styling pipeline:
//! stylesheet parse -> document read -> paragraph walk.
//!
//! Usage:
//!   cargo run -p epub-cascade-heap-profile --release -- [OPTIONS] [FILES...]
//!
//! `.css` files are parsed into a rule table; `.xhtml`/`.html` files are read
//! into a text model. Outputs dhat-<phase>.json files in the output directory
//! (default: target/memory).
//! Open in https://nnethercote.github.io/dh_view/dh_view.html

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::{Path, PathBuf};
use std::process::Command;

use epub_cascade::decoration::StyleCursor;
use epub_cascade::xhtml::DirStylesheets;
use epub_cascade::{parse_stylesheet, StyleEnvironment, XhtmlReader};

const DEFAULT_FIXTURES: &[&str] = &[
    "tests/fixtures/css/basic/in.css",
    "tests/fixtures/css/selectors/in.css",
    "tests/fixtures/xhtml/chapter.xhtml",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Parse,
    Read,
    Walk,
}

impl Phase {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "parse" => Some(Self::Parse),
            "read" => Some(Self::Read),
            "walk" => Some(Self::Walk),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Read => "read",
            Self::Walk => "walk",
        }
    }
}

fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("css"))
}

fn profile_file(path: &Path, phase: Phase) {
    let path_str = path.to_string_lossy();
    let bytes = std::fs::read(path).unwrap_or_else(|e| panic!("read {}: {}", path_str, e));

    if is_stylesheet(path) {
        let css = String::from_utf8_lossy(&bytes);
        for _ in 0..5 {
            let table = parse_stylesheet(&css);
            let _ = table.len();
        }
        return;
    }
    if phase == Phase::Parse {
        return;
    }

    let env = StyleEnvironment::default();
    let root = path.parent().unwrap_or_else(|| Path::new("."));
    let reference = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut reader = XhtmlReader::with_loader(&env, DirStylesheets::new(root));
    let model = reader
        .read(&reference, &bytes)
        .unwrap_or_else(|e| panic!("read {}: {}", path_str, e));

    if phase == Phase::Walk {
        let mut cursor = StyleCursor::new(&env);
        let mut entries = 0usize;
        for paragraph in model.paragraphs() {
            cursor.reset();
            for entry in paragraph.iter().flatten() {
                if let Ok(decoded) = entry.decode() {
                    cursor.apply(&decoded);
                    entries = entries.saturating_add(1);
                }
            }
        }
        if entries == 0 && !model.is_empty() {
            panic!("walk {} decoded zero entries", path_str);
        }
    }
}

/// Extract a short name from a file path for use in output filenames.
fn short_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn usage() {
    eprintln!("Usage: heap-profile [OPTIONS] [FILES...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --phase <parse|read|walk>  Pipeline phase to profile (default: read)");
    eprintln!("  --out-dir <DIR>            Output directory for dhat JSON (default: target/memory)");
    eprintln!("  --aggregate                Single profile for all files (default: per-file)");
    eprintln!();
    eprintln!("By default, each file gets its own clean DHAT profile (separate process).");
    eprintln!("If no files are given, profiles the test fixtures.");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut phase = Phase::Read;
    let mut out_dir = PathBuf::from("target/memory");
    let mut files: Vec<PathBuf> = Vec::with_capacity(8);
    let mut aggregate = false;
    let mut single_file_mode = false;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--phase" => {
                i += 1;
                phase = args.get(i).and_then(|s| Phase::from_str(s)).unwrap_or_else(|| {
                    eprintln!("Unknown phase: {}", args.get(i).map_or("", String::as_str));
                    usage();
                    std::process::exit(1);
                });
            }
            "--out-dir" => {
                i += 1;
                match args.get(i) {
                    Some(dir) => out_dir = PathBuf::from(dir),
                    None => {
                        usage();
                        std::process::exit(1);
                    }
                }
            }
            "--aggregate" => aggregate = true,
            // Internal: child process mode, profile exactly one file.
            "--single-file" => single_file_mode = true,
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => files.push(PathBuf::from(other)),
        }
        i += 1;
    }

    if files.is_empty() {
        files.extend(
            DEFAULT_FIXTURES
                .iter()
                .map(PathBuf::from)
                .filter(|p| p.exists()),
        );
    }

    if files.is_empty() {
        eprintln!("No input files found. Provide paths or ensure test fixtures exist.");
        std::process::exit(1);
    }

    std::fs::create_dir_all(&out_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create output dir {}: {}", out_dir.display(), e);
        std::process::exit(1);
    });

    let phase_name = phase.name();

    if single_file_mode {
        assert!(files.len() == 1, "--single-file expects exactly one file");
        let file = &files[0];
        let name = short_name(file);
        let json_path = out_dir.join(format!("dhat-{phase_name}-{name}.json"));
        let _profiler = dhat::Profiler::builder().file_name(json_path).build();
        profile_file(file, phase);
        return;
    }

    if aggregate {
        let json_path = out_dir.join(format!("dhat-{phase_name}.json"));
        eprintln!(
            "heap-profile: phase={}, files={} (aggregate), out={}",
            phase_name,
            files.len(),
            out_dir.display()
        );
        let _profiler = dhat::Profiler::builder()
            .file_name(json_path.clone())
            .build();
        for file in &files {
            eprintln!("  profiling: {}", file.display());
            profile_file(file, phase);
        }
        eprintln!(
            "Done. Open {} in https://nnethercote.github.io/dh_view/dh_view.html",
            json_path.display()
        );
        return;
    }

    let self_exe = std::env::current_exe().unwrap_or_else(|e| {
        eprintln!("Failed to determine own executable path: {}", e);
        std::process::exit(1);
    });

    eprintln!(
        "heap-profile: phase={}, files={} (per-file), out={}",
        phase_name,
        files.len(),
        out_dir.display()
    );

    let mut any_failed = false;
    for file in &files {
        let name = short_name(file);
        eprintln!(
            "  profiling: {} -> dhat-{}-{}.json",
            file.display(),
            phase_name,
            name
        );
        let status = Command::new(&self_exe)
            .arg("--single-file")
            .arg("--phase")
            .arg(phase_name)
            .arg("--out-dir")
            .arg(&out_dir)
            .arg(file)
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                eprintln!("    FAILED (exit {})", s.code().unwrap_or(-1));
                any_failed = true;
            }
            Err(e) => {
                eprintln!("    FAILED to spawn: {}", e);
                any_failed = true;
            }
        }
    }

    eprintln!();
    eprintln!("Open in https://nnethercote.github.io/dh_view/dh_view.html");
    if any_failed {
        std::process::exit(1);
    }
}
