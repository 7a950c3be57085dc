use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use ogframe::capture::{CaptureConfig, CapturePipeline, StaticLoader};
use ogframe::template::TemplateRegistry;
use ogframe::{EditorConfig, Frame};

fn bench_capture(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build runtime");

    let registry = TemplateRegistry::from_path("demos/layouts.json").expect("read demo layouts");
    let layouts = registry
        .into_definitions(&EditorConfig::default())
        .expect("compile layouts");
    let headline = &layouts[0];
    let data = json!({"kicker": "Bench", "title": "Capture latency", "author": {"name": "Criterion"}});
    let frame = Frame::mount(headline.component.as_ref(), &data, headline.dimensions).expect("mount");
    let pipeline = CapturePipeline::new(Arc::new(StaticLoader::new()), CaptureConfig::default());

    c.bench_function("mount_headline", |b| {
        b.iter(|| Frame::mount(headline.component.as_ref(), &data, headline.dimensions).unwrap())
    });

    c.bench_function("capture_headline_1200x630", |b| {
        b.to_async(&runtime)
            .iter(|| async { pipeline.capture(&frame, headline.dimensions).await.unwrap() })
    });
}

criterion_group!(benches, bench_capture);
criterion_main!(benches);
