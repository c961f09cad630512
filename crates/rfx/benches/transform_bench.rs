use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rfx::common::SourceRecord;
use rfx::transforms::{
    CredentialKey, CredentialKeyConfig, SearchDocument, SearchDocumentConfig, Transform,
};
use serde_json::json;

fn users(n: usize) -> Vec<SourceRecord> {
    (0..n)
        .filter_map(|i| {
            SourceRecord::from_value(json!({
                "user_id": i,
                "email": format!("user{i}@example.com"),
                "password_hash": format!("$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMU{i}"),
            }))
        })
        .collect()
}

fn events(n: usize) -> Vec<SourceRecord> {
    (0..n)
        .filter_map(|i| {
            SourceRecord::from_value(json!({
                "id": i,
                "title": "Щелкунчик",
                "description": "Балет в двух действиях",
                "datetime_start": "2024-12-25 19:00:00",
                "total_seats": 300,
                "created_at": if i % 2 == 0 { json!("2024-01-01T00:00:00Z") } else { json!(null) },
            }))
        })
        .collect()
}

fn benchmark_credential_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("credential_key");
    let transform = CredentialKey::new(CredentialKeyConfig::default());

    for size in [1_000, 10_000] {
        let records = users(size);
        group.bench_with_input(
            BenchmarkId::new("page", size),
            &records,
            |b, records| {
                b.iter(|| {
                    for record in records {
                        let _ = black_box(transform.transform(record));
                    }
                })
            },
        );
    }

    group.finish();
}

fn benchmark_search_document(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_document");
    let transform = SearchDocument::new(SearchDocumentConfig::default());

    for size in [1_000, 10_000] {
        let records = events(size);
        group.bench_with_input(
            BenchmarkId::new("page", size),
            &records,
            |b, records| {
                b.iter(|| {
                    for record in records {
                        let _ = black_box(transform.transform(record));
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_credential_key, benchmark_search_document);
criterion_main!(benches);
