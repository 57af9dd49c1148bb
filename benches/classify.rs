use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pageship::autofix::{Classifier, ErrorReport};
use pageship::manifest::Manifest;

fn synthetic_log(lines: usize) -> String {
    let mut out = String::with_capacity(lines * 64);
    for i in 0..lines {
        out.push_str(&format!(
            "[webpack] compiled chunk {:05} in {}ms (src/features/f{:03}/index.tsx)\n",
            i,
            i % 97,
            i % 120
        ));
    }
    out.push_str("Module not found: Error: Can't resolve '@emotion/react' in '/site/src'\n");
    out.push_str("FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory\n");
    out
}

fn bench_classify(c: &mut Criterion) {
    let manifest = Manifest::from_value(serde_json::json!({
        "name": "site",
        "devDependencies": { "vite": "^5.0.0" }
    }));
    let small = ErrorReport::new("Error: Cannot find module 'left-pad'");
    let large = ErrorReport::new(synthetic_log(50_000));

    c.bench_function("classify_single_line", |b| {
        let classifier = Classifier::new(manifest.as_ref());
        b.iter(|| black_box(classifier.analyze(black_box(&small))))
    });

    c.bench_function("classify_large_log", |b| {
        let classifier = Classifier::new(manifest.as_ref());
        b.iter(|| black_box(classifier.analyze(black_box(&large))))
    });
}

criterion_group!(benches, bench_classify);
criterion_main!(benches);
