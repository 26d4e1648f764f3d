mod common;

use std::path::Path;

use common::fixtures::{read_fixture, CHAPTER_FIXTURE};
use epub_cascade::decoration::StyleCursor;
use epub_cascade::{
    DirStylesheets, Paragraph, ParagraphKind, StyleEnvironment, TextModel, TextStyle,
    XhtmlReader,
};

fn read_chapter(env: &StyleEnvironment) -> TextModel {
    let path = Path::new(CHAPTER_FIXTURE);
    let root = path.parent().expect("fixture has a parent directory");
    let bytes = read_fixture(path);
    XhtmlReader::with_loader(env, DirStylesheets::new(root))
        .read("chapter.xhtml", &bytes)
        .unwrap_or_else(|e| panic!("read {}: {}", CHAPTER_FIXTURE, e))
}

fn entries(paragraph: &Paragraph) -> Vec<String> {
    paragraph
        .iter()
        .map(|entry| {
            entry
                .and_then(|e| e.decode())
                .expect("entry should decode")
                .to_string()
        })
        .collect()
}

fn find<'m>(model: &'m TextModel, text: &str) -> (usize, &'m Paragraph) {
    model
        .paragraphs()
        .iter()
        .enumerate()
        .find(|(_, p)| p.text() == text)
        .unwrap_or_else(|| panic!("no paragraph with text {:?}", text))
}

#[test]
fn chapter_text_survives_in_document_order() {
    let env = StyleEnvironment::default();
    let model = read_chapter(&env);
    let texts: Vec<String> = model
        .paragraphs()
        .iter()
        .filter(|p| p.kind() == ParagraphKind::Text)
        .map(Paragraph::text)
        .filter(|t| !t.is_empty())
        .collect();
    assert_eq!(
        texts,
        vec![
            "Chapter One",
            "It was a dark night.",
            "See 1 and the site.",
            "line oneline two",
            "The end.",
        ]
    );
}

#[test]
fn linked_and_embedded_rules_both_apply() {
    let env = StyleEnvironment::default();
    let model = read_chapter(&env);

    let (_, heading) = find(&model, "Chapter One");
    let heading = entries(heading);
    assert!(heading.contains(&"control h1 start".to_string()), "{heading:?}");
    assert!(heading.contains(&"style text-align=center".to_string()), "{heading:?}");

    let (_, first) = find(&model, "It was a dark night.");
    assert!(entries(first).contains(&"style text-indent=0".to_string()));

    let (_, last) = find(&model, "The end.");
    assert!(entries(last).contains(&"style text-indent=1.5em text-align=right".to_string()));
}

#[test]
fn hidden_block_is_dropped() {
    let env = StyleEnvironment::default();
    let model = read_chapter(&env);
    assert!(model
        .paragraphs()
        .iter()
        .all(|p| !p.text().contains("Never shown")));
}

#[test]
fn links_and_labels_are_recorded() {
    let env = StyleEnvironment::default();
    let model = read_chapter(&env);

    let (heading_index, _) = find(&model, "Chapter One");
    assert_eq!(model.label("chapter.xhtml#c1"), Some(heading_index));

    let (_, links) = find(&model, "See 1 and the site.");
    let links = entries(links);
    assert!(links.contains(&"hyperlink footnote internal notes.xhtml#n1".to_string()));
    assert!(
        links.contains(&"hyperlink external-hyperlink external http://example.org/".to_string())
    );
}

#[test]
fn preformatted_block_breaks_lines() {
    let env = StyleEnvironment::default();
    let model = read_chapter(&env);
    let (_, pre) = find(&model, "line oneline two");
    let pre = entries(pre);
    assert!(pre.contains(&"control preformatted start".to_string()));
    assert!(pre.contains(&"line-break".to_string()));
}

#[test]
fn style_cursor_walks_every_paragraph() {
    let env = StyleEnvironment::default();
    let model = read_chapter(&env);
    let mut cursor = StyleCursor::new(&env);
    for paragraph in model.paragraphs() {
        cursor.reset();
        for entry in paragraph.iter() {
            let entry = entry
                .and_then(|e| e.decode())
                .expect("entry should decode");
            cursor.apply(&entry);
        }
        assert!(cursor.current().font_size() > 0);
    }
}

#[test]
fn missing_stylesheet_directory_still_reads() {
    let env = StyleEnvironment::default();
    let bytes = read_fixture(CHAPTER_FIXTURE);
    let model = XhtmlReader::with_loader(&env, DirStylesheets::new("tests/fixtures/nowhere"))
        .read("chapter.xhtml", &bytes)
        .expect("document should read without its stylesheet");
    let (_, last) = find(&model, "The end.");
    assert!(!entries(last).iter().any(|e| e.contains("text-align=right")));
}
