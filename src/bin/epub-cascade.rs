//! Command line front end for `epub-cascade`.
//!
//! ```text
//! epub-cascade dump FILE.css...
//! epub-cascade xhtml FILE.xhtml
//! epub-cascade --autotest DIR
//! ```

use std::env;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use epub_cascade::{
    DirStylesheets, ParagraphKind, StyleEnvironment, StyleSheetTable, StyleSheetTableParser,
    XhtmlReader,
};

const EXIT_USAGE: u8 = 1;
const EXIT_IO: u8 = 2;
const EXIT_MISMATCH: u8 = 3;

enum Command {
    Dump(Vec<PathBuf>),
    Xhtml(PathBuf),
    Autotest(PathBuf),
}

enum CliError {
    Usage(String),
    Io(String),
    Mismatch(usize),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Usage(_) => ExitCode::from(EXIT_USAGE),
            Self::Io(_) => ExitCode::from(EXIT_IO),
            Self::Mismatch(_) => ExitCode::from(EXIT_MISMATCH),
        }
    }
}

fn help_text() -> &'static str {
    "usage:\n  epub-cascade dump FILE.css...\n  epub-cascade xhtml FILE.xhtml\n  \
     epub-cascade --autotest DIR"
}

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match &err {
                CliError::Usage(msg) => {
                    eprintln!("error: {}", msg);
                    eprintln!("{}", help_text());
                }
                CliError::Io(msg) => eprintln!("error: {}", msg),
                CliError::Mismatch(count) => eprintln!("{} case(s) failed", count),
            }
            err.exit_code()
        }
    }
}

fn run(args: Vec<String>) -> Result<(), CliError> {
    match parse_args(args)? {
        Command::Dump(files) => {
            for file in &files {
                print!("{}", load_table(file)?);
            }
            Ok(())
        }
        Command::Xhtml(file) => dump_xhtml(&file),
        Command::Autotest(dir) => autotest(&dir),
    }
}

fn parse_args(args: Vec<String>) -> Result<Command, CliError> {
    let Some(command) = args.get(1) else {
        return Err(CliError::Usage("missing command".to_string()));
    };
    let rest = &args[2..];
    match command.as_str() {
        "--help" | "-h" => Err(CliError::Usage("help requested".to_string())),
        "dump" => {
            if rest.is_empty() {
                return Err(CliError::Usage("dump requires at least one file".to_string()));
            }
            Ok(Command::Dump(rest.iter().map(PathBuf::from).collect()))
        }
        "xhtml" => match rest {
            [file] => Ok(Command::Xhtml(PathBuf::from(file))),
            _ => Err(CliError::Usage("xhtml requires exactly one file".to_string())),
        },
        "--autotest" => match rest {
            [dir] => Ok(Command::Autotest(PathBuf::from(dir))),
            _ => Err(CliError::Usage("--autotest requires a directory".to_string())),
        },
        other => Err(CliError::Usage(format!("unknown command '{}'", other))),
    }
}

fn load_table(path: &Path) -> Result<StyleSheetTable, CliError> {
    let file = File::open(path).map_err(|e| CliError::Io(format!("{}: {}", path.display(), e)))?;
    let mut table = StyleSheetTable::new();
    StyleSheetTableParser::new(&mut table)
        .parse_reader(BufReader::new(file))
        .map_err(|e| CliError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(table)
}

fn dump_xhtml(path: &Path) -> Result<(), CliError> {
    let bytes = fs::read(path).map_err(|e| CliError::Io(format!("{}: {}", path.display(), e)))?;
    let root = path.parent().unwrap_or_else(|| Path::new("."));
    let reference = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let env = StyleEnvironment::default();
    let mut reader = XhtmlReader::with_loader(&env, DirStylesheets::new(root));
    let model = reader
        .read(&reference, &bytes)
        .map_err(|e| CliError::Io(e.to_string()))?;

    for (index, paragraph) in model.paragraphs().iter().enumerate() {
        let kind = match paragraph.kind() {
            ParagraphKind::Text => "text",
            ParagraphKind::EmptyLine => "empty-line",
            ParagraphKind::EndOfSection => "end-of-section",
            ParagraphKind::EndOfText => "end-of-text",
        };
        println!("#{} {}", index, kind);
        for entry in paragraph.iter() {
            match entry.and_then(|entry| entry.decode()) {
                Ok(entry) => println!("    {}", entry),
                Err(err) => {
                    println!("    <{}>", err);
                    break;
                }
            }
        }
    }
    for (name, paragraph) in model.labels() {
        println!("label {} -> #{}", name, paragraph);
    }
    Ok(())
}

/// Compare the dump of every `<case>/in.css` with its `<case>/out.css`.
fn autotest(dir: &Path) -> Result<(), CliError> {
    let entries =
        fs::read_dir(dir).map_err(|e| CliError::Io(format!("{}: {}", dir.display(), e)))?;
    let mut cases: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join("in.css").is_file())
        .collect();
    cases.sort();

    let mut failed = 0usize;
    for case in &cases {
        let actual = load_table(&case.join("in.css"))?.to_string();
        let expected_path = case.join("out.css");
        let expected = fs::read_to_string(&expected_path)
            .map_err(|e| CliError::Io(format!("{}: {}", expected_path.display(), e)))?;
        if actual == expected {
            println!("ok   {}", case.display());
        } else {
            println!("FAIL {}", case.display());
            print_first_difference(&expected, &actual);
            failed += 1;
        }
    }
    println!("{} case(s), {} failed", cases.len(), failed);
    if failed == 0 {
        Ok(())
    } else {
        Err(CliError::Mismatch(failed))
    }
}

fn print_first_difference(expected: &str, actual: &str) {
    let mut expected_lines = expected.lines();
    let mut actual_lines = actual.lines();
    let mut line = 1;
    loop {
        match (expected_lines.next(), actual_lines.next()) {
            (None, None) => return,
            (e, a) if e == a => line += 1,
            (e, a) => {
                println!("    line {}: expected {:?}", line, e.unwrap_or("<eof>"));
                println!("    line {}: actual   {:?}", line, a.unwrap_or("<eof>"));
                return;
            }
        }
    }
}
