use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ordlista_rs::convert::format_posts;
use ordlista_rs::{OutputFormat, Settings, build_query};
use serde_json::{Value, json};

fn settings() -> Settings {
    let defaults = json!({
        "default": {
            "mode": "term-swefin",
            "languages": ["sv", "fi"],
            "sourcelanguage": "sv",
            "baseform.search": "baselang.wordform",
            "targetform.search": "targetlang.wordform",
            "targetsort": "targetlang.wordform.sort",
            "maxsize": 50,
            "maxsize_export": 5000,
            "overflowsize": 300,
            "username": "bench",
            "password": "bench"
        },
        "term-swefin": {"resource": "term-swefin", "subtypes": "subtypes.txt"}
    });
    Settings::from_layers(json!({}), defaults).expect("bench settings")
}

fn entries(count: usize) -> Vec<Value> {
    (0..count)
        .map(|idx| {
            json!({
                "baselang": {
                    "form": [{"wordform": format!("ord{idx}"), "comment": "subst."}],
                    "compound": [format!("ord{idx}lista"), format!("ord{idx}bok")]
                },
                "targetlang": [{
                    "form": [{"wordform": format!("sana{idx}")}, {"wordform": "termi", "comment": "ark."}],
                    "compound": [format!("sana{idx}lista (ark.)")]
                }],
                "subtype": ["muminfigurer"]
            })
        })
        .collect()
}

fn bench_build_query(c: &mut Criterion) {
    let settings = settings();
    let profile = settings.profile("term-swefin").expect("bench profile");
    let subtypes: Vec<String> = ["muminfigurer", "djur", "växter"]
        .iter()
        .map(|name| name.to_string())
        .collect();
    c.bench_function("build_query::prefix", |b| {
        b.iter(|| black_box(build_query(black_box("Mumin"), &subtypes, false, "sv", profile)));
    });
    c.bench_function("build_query::contains", |b| {
        b.iter(|| black_box(build_query(black_box("pappa"), &subtypes, true, "fi", profile)));
    });
}

fn bench_html_export(c: &mut Criterion) {
    for &count in &[10usize, 500] {
        let sources = entries(count);
        c.bench_with_input(BenchmarkId::new("html_export", count), &sources, |b, sources| {
            b.iter(|| {
                let rendered = format_posts(sources, "term-swefin", OutputFormat::Html, "")
                    .expect("render export");
                black_box(rendered);
            });
        });
    }
}

criterion_group!(benches, bench_build_query, bench_html_export);
criterion_main!(benches);
