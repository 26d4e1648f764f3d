mod common;

use std::fs::File;

use common::fixtures::{css_cases, read_fixture_string};
use epub_cascade::{parse_stylesheet, StyleSheetTable, StyleSheetTableParser};

#[test]
fn every_css_case_matches_its_golden_dump() {
    let cases = css_cases();
    assert!(
        cases.len() >= 3,
        "expected css cases under tests/fixtures/css, found {}",
        cases.len()
    );

    for case in cases {
        let input = read_fixture_string(case.join("in.css"));
        let expected = read_fixture_string(case.join("out.css"));
        let actual = parse_stylesheet(&input).to_string();
        assert_eq!(
            actual,
            expected,
            "dump mismatch for {}",
            case.display()
        );
    }
}

#[test]
fn streamed_parse_matches_whole_buffer_parse() {
    for case in css_cases() {
        let path = case.join("in.css");
        let whole = parse_stylesheet(&read_fixture_string(&path));

        let mut streamed = StyleSheetTable::new();
        let file = File::open(&path).unwrap_or_else(|e| panic!("open {}: {}", path.display(), e));
        StyleSheetTableParser::new(&mut streamed)
            .parse_reader(file)
            .unwrap_or_else(|e| panic!("stream {}: {}", path.display(), e));

        assert_eq!(streamed, whole, "streaming changed {}", case.display());
    }
}

#[test]
fn byte_at_a_time_parse_matches_whole_buffer_parse() {
    for case in css_cases() {
        let input = read_fixture_string(case.join("in.css"));
        let whole = parse_stylesheet(&input);

        let mut table = StyleSheetTable::new();
        let mut parser = StyleSheetTableParser::new(&mut table);
        for byte in input.as_bytes() {
            parser.parse(std::slice::from_ref(byte));
        }
        parser.finish();

        assert_eq!(table, whole, "chunking changed {}", case.display());
    }
}

#[test]
fn crlf_input_dumps_like_lf_input() {
    let case = css_cases()
        .into_iter()
        .find(|case| case.ends_with("basic"))
        .expect("basic css case");
    let input = read_fixture_string(case.join("in.css"));
    let crlf = input.replace('\n', "\r\n");
    assert_eq!(
        parse_stylesheet(&crlf).to_string(),
        parse_stylesheet(&input).to_string()
    );
}
