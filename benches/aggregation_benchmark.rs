use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dex_aggregator::aggregation::aggregate;
use dex_aggregator::{Price, QuoteUpdate, Size, Symbol, VenueId};
use std::str::FromStr;

fn fixture() -> (Symbol, Vec<QuoteUpdate>) {
    let symbol = Symbol::new("BTC-USD");
    let quotes = VenueId::ALL
        .iter()
        .enumerate()
        .map(|(i, &venue)| QuoteUpdate {
            venue,
            symbol: symbol.clone(),
            bid: Price::from_str(&format!("4500{}.25", i)).unwrap(),
            bid_size: Size::from_str("1.5").unwrap(),
            ask: Price::from_str(&format!("4501{}.75", i)).unwrap(),
            ask_size: Size::from_str("2").unwrap(),
            timestamp: chrono::Utc::now(),
        })
        .collect();
    (symbol, quotes)
}

fn bench_aggregate(c: &mut Criterion) {
    let (symbol, quotes) = fixture();
    c.bench_function("aggregate_three_venue_quotes", |b| {
        b.iter(|| aggregate(black_box(&symbol), black_box(&quotes)))
    });

    let (symbol, quotes) = fixture();
    let single = &quotes[..1];
    c.bench_function("aggregate_single_venue_quote", |b| {
        b.iter(|| aggregate(black_box(&symbol), black_box(single)))
    });
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
