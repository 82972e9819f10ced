use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use srf_core::first_party::FirstPartyOrigin;
use srf_core::matcher::IndexedRulesetMatcher;
use srf_core::ruleset::IndexedRuleset;
use srf_core::types::ElementTypes;
use srf_indexer::{index_filter_list, parse_filter_list};
use url::Url;

/// Synthetic filter list with a mix of anchored, wildcarded and domain rules
fn synthetic_filter_list(rule_count: usize) -> String {
    let mut text = String::new();
    for i in 0..rule_count {
        let line = match i % 5 {
            0 => format!("||ads{}.example^\n", i),
            1 => format!("/banner{}/*.gif\n", i),
            2 => format!("/track{}.js$script,third-party\n", i),
            3 => format!("/pixel{}^$image,domain=site{}.com|~news.site{}.com\n", i, i, i),
            _ => format!("@@||cdn{}.example/ok/\n", i),
        };
        text.push_str(&line);
    }
    text
}

fn bench_requests() -> Vec<Url> {
    [
        "https://www.example.com/index.html",
        "https://ads3.example/serve?id=1",
        "https://static.site.com/banner1/x/y.gif",
        "https://cdn9.example/ok/lib.js",
        "https://img.site3.com/pixel3/1x1.png",
        "https://fonts.example.org/roboto.woff2",
    ]
    .iter()
    .map(|u| Url::parse(u).unwrap())
    .collect()
}

fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("index");
    for rule_count in [1_000usize, 10_000] {
        let text = synthetic_filter_list(rule_count);
        group.bench_with_input(BenchmarkId::from_parameter(rule_count), &text, |b, text| {
            b.iter(|| {
                let (indexer, _) = index_filter_list(parse_filter_list(black_box(text)));
                indexer.size()
            })
        });
    }
    group.finish();
}

fn bench_should_disallow(c: &mut Criterion) {
    let (indexer, _) = index_filter_list(parse_filter_list(&synthetic_filter_list(10_000)));
    let data = indexer.into_data();
    IndexedRuleset::verify(&data).expect("benchmark ruleset should verify");
    let matcher = IndexedRulesetMatcher::new(&data).unwrap();
    let requests = bench_requests();
    let origin = Url::parse("https://www.site.com/").unwrap().origin();

    c.bench_function("should_disallow_resource_load", |b| {
        let mut first_party = FirstPartyOrigin::new(origin.clone());
        b.iter(|| {
            requests
                .iter()
                .filter(|url| {
                    matcher.should_disallow_resource_load(black_box(url), &mut first_party, ElementTypes::IMAGE, false)
                })
                .count()
        })
    });
}

fn bench_verify(c: &mut Criterion) {
    let (indexer, _) = index_filter_list(parse_filter_list(&synthetic_filter_list(10_000)));
    let data = indexer.into_data();
    c.bench_function("verify", |b| b.iter(|| IndexedRuleset::verify(black_box(&data)).is_ok()));
}

criterion_group!(benches, bench_index, bench_should_disallow, bench_verify);
criterion_main!(benches);
