use chrono::{TimeZone, Utc};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use encoding_rs::UTF_8;
use roster_analytics::batch::RosterBatch;
use roster_analytics::config::EngineConfig;
use roster_analytics::engine::Engine;
use roster_analytics::store::MemoryStore;

const UNITS: [&str; 4] = ["Hacienda", "Salud", "Obras Publicas", "Educacion"];

fn generate_roster(rows: usize) -> Vec<u8> {
    let mut csv = String::from(
        "SECRETARIA,TIPO_CONTRATACION,FUNCION,ESCALAFON,FECHA_NACIMIENTO,FECHA_INGRESO,GENERO,SUELDO_BASICO,DEPARTAMENTO,SUBDEPARTAMENTO,CARGO\n",
    );
    for i in 0..rows {
        let unit = UNITS[i % UNITS.len()];
        let contract = if i % 3 == 0 { "Contrato" } else { "Planta" };
        let gender = if i % 2 == 0 { "F" } else { "M" };
        let birth_year = 1960 + (i % 40);
        let hire_year = 1990 + (i % 34);
        let salary = 800 + (i % 50) * 37;
        csv.push_str(&format!(
            "{unit},{contract},Administrativa,Cat {},{birth_year}-03-14,{hire_year}-02-01,{gender},{salary},Rentas,Mesa {},Agente\n",
            i % 24,
            i % 7
        ));
    }
    csv.into_bytes()
}

fn bench_parse(c: &mut Criterion) {
    let bytes = generate_roster(20_000);
    c.bench_function("parse_roster_20k", |b| {
        b.iter(|| RosterBatch::parse("padron.csv", &bytes, b',', UTF_8).expect("parse"))
    });
}

fn bench_ingest(c: &mut Criterion) {
    let bytes = generate_roster(20_000);
    let batch = RosterBatch::parse("padron.csv", &bytes, b',', UTF_8).expect("parse");
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    c.bench_function("ingest_roster_20k", |b| {
        b.iter_batched(
            || Engine::new(MemoryStore::new(), EngineConfig::default()),
            |engine| engine.ingest_at(&batch, None, now).expect("ingest"),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_parse, bench_ingest);
criterion_main!(benches);
