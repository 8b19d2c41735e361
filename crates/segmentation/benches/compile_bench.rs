//! Benchmarks for segment query compilation.
//! Run with: cargo bench -p crm-segmentation

use chrono::Utc;
use crm_core::config::PlaceholderStyle;
use crm_segmentation::{Mode, SegmentCompiler, SegmentQuery};

fn create_test_query() -> SegmentQuery {
    serde_json::from_value(serde_json::json!({
        "logic": "OR",
        "groups": [
            { "conditions": [
                { "field": "tags", "operator": "contains_any", "value": ["vip", "toast", "square", "clover"] },
                { "field": "engagement_score", "operator": "between", "value": [40, 100] },
                { "field": "last_open_at", "operator": "in_last_days", "value": 30 }
            ]},
            { "logic": "OR", "conditions": [
                { "field": "state", "operator": "in_list", "value": ["TX", "OK", "LA", "NM", "AR"] },
                { "field": "email_domain", "operator": "not_equals", "value": "gmail.com" },
                { "field": "phone", "operator": "is_not_empty" }
            ]}
        ]
    }))
    .expect("benchmark query is valid")
}

fn main() {
    let compiler = SegmentCompiler::default();
    let query = create_test_query();
    let now = Utc::now();

    // Warmup
    for _ in 0..100 {
        compiler.compile(&query, Mode::Rows, now).unwrap();
    }

    // Benchmark
    let iterations = 100_000u32;
    let start = std::time::Instant::now();

    let mut params = 0;
    for _ in 0..iterations {
        let filter = compiler.compile(&query, Mode::Rows, now).unwrap();
        let sql = filter.to_sql("email_subscribers", PlaceholderStyle::Question);
        params += filter.parameters().len() + sql.len() % 2;
    }

    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations;

    println!("=== Segment Compile Benchmark ===");
    println!("Iterations:  {}", iterations);
    println!("Total time:  {:?}", elapsed);
    println!("Per compile: {:?}", per_iter);
    println!("Throughput:  {:.0} compiles/sec", iterations as f64 / elapsed.as_secs_f64());
    println!("Checksum:    {}", params);
}
