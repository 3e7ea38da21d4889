//! Benchmarks for cell resolution and cell store ingestion.
//!
//! Run with: cargo bench
//!
//! Results are saved to `target/criterion/` with HTML reports.
#![allow(
    clippy::expect_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use sheetview::numfmt::format_value;
use sheetview::{
    resolve, CellStore, CellValue, ColorSpec, DateSystem, FillSpec, PatternType, RawCell,
    RenderContext, SheetBatch, StyleDescriptor, Viewport,
};

fn styled() -> StyleDescriptor {
    StyleDescriptor {
        num_fmt: Some("#,##0.00;[Red]-#,##0.00".to_string()),
        fill: Some(FillSpec {
            pattern: Some(PatternType::Solid),
            fg_color: Some(ColorSpec::theme(4, Some(0.4))),
            bg_color: None,
        }),
        ..StyleDescriptor::default()
    }
}

fn batch(rows: u32, cols: u32) -> SheetBatch {
    let cells = (1..=rows)
        .flat_map(|row| {
            (1..=cols).map(move |col| RawCell {
                row,
                col,
                value: json!(f64::from(row * col) * 1.25),
                style: None,
            })
        })
        .collect();
    SheetBatch {
        cells,
        viewport: Some(Viewport::new(1, 1, rows, cols)),
        ..SheetBatch::default()
    }
}

/// Number format patterns of each kind
fn bench_format_value(c: &mut Criterion) {
    let patterns = [
        ("general", "General"),
        ("currency", "$#,##0.00"),
        ("percent", "0.00%"),
        ("scientific", "0.00E+00"),
        ("date", "yyyy-mm-dd hh:mm"),
        ("sections", "#,##0;[Red](#,##0);\"-\""),
    ];

    let mut group = c.benchmark_group("format_value");
    for (name, pattern) in patterns {
        group.bench_with_input(BenchmarkId::from_parameter(name), pattern, |b, pattern| {
            b.iter(|| format_value(black_box(44_927.625), pattern, DateSystem::Excel1900))
        });
    }
    group.finish();
}

/// Full resolution of one styled cell, light and dark
fn bench_resolve(c: &mut Criterion) {
    let value = CellValue::Number(-1234.5);
    let style = styled();
    let light = RenderContext::default();
    let dark = RenderContext {
        dark_mode: true,
        zoom_factor: 1.5,
        ..RenderContext::default()
    };

    c.bench_function("resolve_styled_light", |b| {
        b.iter(|| resolve(black_box(&value), &style, &light))
    });
    c.bench_function("resolve_styled_dark", |b| {
        b.iter(|| resolve(black_box(&value), &style, &dark))
    });
}

/// Ingesting a viewport-sized batch and scanning it row-major
fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_store");
    for (rows, cols) in [(150, 56), (500, 100)] {
        let data = batch(rows, cols);
        group.throughput(Throughput::Elements(u64::from(rows * cols)));
        group.bench_with_input(
            BenchmarkId::new("replace", format!("{rows}x{cols}")),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut store = CellStore::new();
                    store.replace(data.clone());
                    store.len()
                })
            },
        );

        let mut store = CellStore::new();
        store.replace(data);
        let view = Viewport::new(rows / 2, 1, rows / 2 + 40, 26);
        group.bench_with_input(
            BenchmarkId::new("cells_in", format!("{rows}x{cols}")),
            &store,
            |b, store| b.iter(|| store.cells_in(black_box(view)).len()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_format_value, bench_resolve, bench_store);

criterion_main!(benches);
