use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use epub_cascade::decoration::StyleCursor;
use epub_cascade::{
    parse_stylesheet, CascadeLimits, StyleCascade, StyleEnvironment, XhtmlReader,
};

const CSS_FIXTURES: &[(&str, &str)] = &[
    ("css-basic", "tests/fixtures/css/basic/in.css"),
    ("css-selectors", "tests/fixtures/css/selectors/in.css"),
    ("css-malformed", "tests/fixtures/css/malformed/in.css"),
];

const CHAPTER_FIXTURE: &str = "tests/fixtures/xhtml/chapter.xhtml";

/// Rule counts for the generated stylesheets.
const SYNTHETIC_RULES: &[usize] = &[100, 1000];

struct TrackingAllocator;

static CURRENT_ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);
static PEAK_ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);

#[global_allocator]
static GLOBAL_ALLOCATOR: TrackingAllocator = TrackingAllocator;

fn current_alloc_bytes() -> usize {
    CURRENT_ALLOC_BYTES.load(Ordering::Relaxed)
}

fn peak_alloc_bytes() -> usize {
    PEAK_ALLOC_BYTES.load(Ordering::Relaxed)
}

fn reset_peak_alloc_bytes() {
    PEAK_ALLOC_BYTES.store(current_alloc_bytes(), Ordering::Relaxed);
}

fn add_current_alloc_bytes(delta: usize) {
    let current = CURRENT_ALLOC_BYTES.fetch_add(delta, Ordering::Relaxed) + delta;
    PEAK_ALLOC_BYTES.fetch_max(current, Ordering::Relaxed);
}

fn sub_current_alloc_bytes(delta: usize) {
    let _ = CURRENT_ALLOC_BYTES.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(delta))
    });
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            add_current_alloc_bytes(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        sub_current_alloc_bytes(layout.size());
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            add_current_alloc_bytes(layout.size());
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            if new_size >= layout.size() {
                add_current_alloc_bytes(new_size - layout.size());
            } else {
                sub_current_alloc_bytes(layout.size() - new_size);
            }
        }
        new_ptr
    }
}

#[derive(Clone, Debug)]
struct CaseResult {
    fixture: String,
    case: &'static str,
    iterations: usize,
    min_ns: u128,
    median_ns: u128,
    mean_ns: u128,
    max_ns: u128,
    median_peak_heap_bytes: usize,
    max_peak_heap_bytes: usize,
}

fn median<T: Copy>(sorted: &[T]) -> T {
    sorted[sorted.len() / 2]
}

fn run_case<F>(
    fixture: &str,
    case: &'static str,
    warmup_iters: usize,
    measure_iters: usize,
    mut op: F,
) -> CaseResult
where
    F: FnMut() -> usize,
{
    for _ in 0..warmup_iters {
        black_box(op());
    }

    let mut time_samples = Vec::with_capacity(measure_iters);
    let mut mem_samples = Vec::with_capacity(measure_iters);
    for _ in 0..measure_iters {
        let baseline_alloc = current_alloc_bytes();
        reset_peak_alloc_bytes();
        let start = Instant::now();
        black_box(op());
        time_samples.push(start.elapsed().as_nanos());
        mem_samples.push(peak_alloc_bytes().saturating_sub(baseline_alloc));
    }

    time_samples.sort_unstable();
    mem_samples.sort_unstable();
    let time_sum: u128 = time_samples.iter().copied().sum();

    CaseResult {
        fixture: fixture.to_string(),
        case,
        iterations: measure_iters,
        min_ns: time_samples[0],
        median_ns: median(&time_samples),
        mean_ns: time_sum / time_samples.len() as u128,
        max_ns: time_samples[time_samples.len() - 1],
        median_peak_heap_bytes: median(&mem_samples),
        max_peak_heap_bytes: mem_samples[mem_samples.len() - 1],
    }
}

fn synthetic_stylesheet(rules: usize) -> String {
    let mut css = String::with_capacity(rules * 64);
    for i in 0..rules {
        css.push_str(&format!(
            "div.c{} p.n{} {{ margin-left: {}px; text-align: center; font-size: 120%; }}\n",
            i,
            i,
            i % 40
        ));
    }
    css.push_str("p { text-indent: 1em } em { font-style: italic }\n");
    css
}

/// Open and close a `div > p > em` tree `rounds` times, matching against
/// every rule in the table.
fn resolve_tree(cascade: &mut StyleCascade, rounds: usize) -> usize {
    let mut resolved = 0;
    for i in 0..rounds {
        let class = format!("c{}", i);
        let inner = format!("n{}", i);
        cascade.element_open("div", Some(&class), None, None);
        cascade.element_open("p", Some(&inner), None, Some("margin-top: 1em"));
        cascade.element_open("em", None, None, None);
        for _ in 0..3 {
            if cascade.element_close().is_ok() {
                resolved += 1;
            }
        }
    }
    resolved
}

fn main() {
    let quick = std::env::args().any(|arg| arg == "--quick");
    let warmup_iters = if quick { 1 } else { 2 };
    let measure_iters = if quick { 3 } else { 10 };

    println!("# epub-cascade benchmark");
    println!(
        "# mode={} warmup_iters={} measure_iters={}",
        if quick { "quick" } else { "full" },
        warmup_iters,
        measure_iters
    );
    println!(
        "fixture,case,iterations,min_ns,median_ns,mean_ns,max_ns,median_peak_heap_bytes,max_peak_heap_bytes"
    );

    let mut results = Vec::new();

    for (key, path) in CSS_FIXTURES {
        let Ok(css) = std::fs::read_to_string(path) else {
            eprintln!("skipping missing fixture {}", path);
            continue;
        };
        results.push(run_case(key, "parse_css", warmup_iters, measure_iters, || {
            parse_stylesheet(&css).len()
        }));
    }

    for &rules in SYNTHETIC_RULES {
        let key = format!("synthetic-{}", rules);
        let css = synthetic_stylesheet(rules);
        results.push(run_case(&key, "parse_css", warmup_iters, measure_iters, || {
            parse_stylesheet(&css).len()
        }));

        let table = Arc::new(parse_stylesheet(&css));
        results.push(run_case(
            &key,
            "resolve_tree",
            warmup_iters,
            measure_iters,
            || {
                let mut cascade = StyleCascade::new(Arc::clone(&table), CascadeLimits::default());
                resolve_tree(&mut cascade, 50)
            },
        ));
    }

    match std::fs::read(CHAPTER_FIXTURE) {
        Ok(bytes) => {
            let env = StyleEnvironment::default();
            results.push(run_case(
                "chapter",
                "read_xhtml",
                warmup_iters,
                measure_iters,
                || {
                    XhtmlReader::new(&env)
                        .read("chapter.xhtml", &bytes)
                        .unwrap_or_else(|e| panic!("read failed: {}", e))
                        .len()
                },
            ));

            let model = XhtmlReader::new(&env)
                .read("chapter.xhtml", &bytes)
                .unwrap_or_else(|e| panic!("read failed: {}", e));
            results.push(run_case(
                "chapter",
                "walk_paragraphs",
                warmup_iters,
                measure_iters,
                || {
                    let mut cursor = StyleCursor::new(&env);
                    let mut applied = 0;
                    for paragraph in model.paragraphs() {
                        cursor.reset();
                        for entry in paragraph.iter().flatten() {
                            if let Ok(entry) = entry.decode() {
                                cursor.apply(&entry);
                                applied += 1;
                            }
                        }
                    }
                    applied
                },
            ));
        }
        Err(e) => eprintln!("skipping {}: {}", CHAPTER_FIXTURE, e),
    }

    for result in &results {
        println!(
            "{},{},{},{},{},{},{},{},{}",
            result.fixture,
            result.case,
            result.iterations,
            result.min_ns,
            result.median_ns,
            result.mean_ns,
            result.max_ns,
            result.median_peak_heap_bytes,
            result.max_peak_heap_bytes
        );
    }
}
