use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docstore_engine::config::EngineConfig;
use docstore_engine::database::Database;
use docstore_engine::document::Document;
use serde_json::json;
use tempfile::tempdir;

fn open_bench_db() -> (tempfile::TempDir, Database) {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path(), EngineConfig::default()).unwrap();
    db.create_collection("widgets").unwrap();
    (dir, db)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for count in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("documents", count), &count, |b, &count| {
            b.iter_batched(
                open_bench_db,
                |(_dir, db)| {
                    let txn = db.begin_transaction();
                    for i in 0..count {
                        let doc = Document::from_value(json!({"_id": format!("w{i}"), "stock": i})).unwrap();
                        db.insert_document(&txn, "widgets", black_box(doc)).unwrap();
                    }
                    db.commit(&txn).unwrap();
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_read_committed(c: &mut Criterion) {
    let (_dir, db) = open_bench_db();
    let txn = db.begin_transaction();
    for i in 0..1000 {
        let doc = Document::from_value(json!({"_id": format!("w{i}"), "stock": i})).unwrap();
        db.insert_document(&txn, "widgets", doc).unwrap();
    }
    db.commit(&txn).unwrap();

    c.bench_function("find_by_id warm chain", |b| {
        b.iter(|| {
            let reader = db.begin_read_only();
            black_box(db.find_document(&reader, "widgets", "w500").unwrap())
        });
    });
}

fn bench_update_contention(c: &mut Criterion) {
    let (_dir, db) = open_bench_db();
    let txn = db.begin_transaction();
    db.insert_document(&txn, "widgets", Document::from_value(json!({"_id": "hot", "v": 0})).unwrap()).unwrap();
    db.commit(&txn).unwrap();

    c.bench_function("update same document repeatedly", |b| {
        let mut v = 0u64;
        b.iter(|| {
            v += 1;
            let txn = db.begin_transaction();
            let updates = json!({"v": v});
            let serde_json::Value::Object(updates) = updates else { unreachable!() };
            db.update_document(&txn, "widgets", "hot", &updates).unwrap();
            db.commit(&txn).unwrap();
        });
    });
}

criterion_group!(benches, bench_insert, bench_read_committed, bench_update_contention);
criterion_main!(benches);
