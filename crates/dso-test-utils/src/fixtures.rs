//! Sample datasets and seeded stores.
//!
//! - `afvalwegingen`: containers with a field-protected owner name and a
//!   relation to clusters
//! - `bommen`: a single empty table
//! - `gebieden`: a temporal dataset with a `geldigOp` dimension
//! - `parkeervakken`: polygons plus a reverse relation to parking regimes

use dso_core::schema::DatasetSchema;
use dso_core::store::{MemoryStore, Row, TableRef};
use serde_json::{Value, json};

fn parse(value: &Value) -> DatasetSchema {
    DatasetSchema::from_json(&value.to_string()).expect("fixture schema")
}

/// Waste container weighings; `eigenaarNaam` requires `BRK/RSN`.
pub fn afvalwegingen_schema() -> DatasetSchema {
    parse(&json!({
        "id": "afvalwegingen",
        "title": "Afvalwegingen",
        "tables": [
            {
                "id": "clusters",
                "fields": [
                    {"name": "id", "type": "string", "nullable": false},
                    {"name": "status", "type": "string"}
                ],
                "reverseRelations": [
                    {"name": "containers", "table": "containers", "field": "cluster"}
                ]
            },
            {
                "id": "containers",
                "fields": [
                    {"name": "id", "type": "integer", "nullable": false},
                    {"name": "cluster", "type": "string", "relation": "clusters"},
                    {"name": "serienummer", "type": "string"},
                    {"name": "eigenaarNaam", "type": "string", "auth": "BRK/RSN"},
                    {"name": "datumCreatie", "type": "date"},
                    {"name": "datumLeegmaken", "type": "datetime"},
                    {"name": "kleur", "type": "string"},
                    {"name": "geometry", "type": "geometry"}
                ]
            }
        ]
    }))
}

/// A dataset with one empty table.
pub fn bommen_schema() -> DatasetSchema {
    parse(&json!({
        "id": "bommen",
        "tables": [{
            "id": "bommen",
            "fields": [
                {"name": "id", "type": "integer", "nullable": false},
                {"name": "naam", "type": "string"}
            ]
        }]
    }))
}

/// Temporal areas: `buurten` point at versioned `wijken`.
pub fn gebieden_schema() -> DatasetSchema {
    let temporal_fields = || {
        json!([
            {"name": "id", "type": "string", "nullable": false},
            {"name": "identificatie", "type": "string", "nullable": false},
            {"name": "volgnummer", "type": "integer", "nullable": false},
            {"name": "naam", "type": "string"},
            {"name": "beginGeldigheid", "type": "date"},
            {"name": "eindGeldigheid", "type": "date"}
        ])
    };
    let mut buurt_fields = temporal_fields();
    if let Value::Array(fields) = &mut buurt_fields {
        fields.push(json!({"name": "ligtInWijk", "type": "string", "relation": "wijken"}));
    }
    parse(&json!({
        "id": "gebieden",
        "identifier": "identificatie",
        "temporal": {
            "identifier": "volgnummer",
            "dimensions": {"geldigOp": ["beginGeldigheid", "eindGeldigheid"]}
        },
        "tables": [
            {"id": "buurten", "fields": buurt_fields},
            {"id": "wijken", "fields": temporal_fields()}
        ]
    }))
}

/// Parking spaces with a reverse relation to their regimes.
pub fn parkeervakken_schema() -> DatasetSchema {
    parse(&json!({
        "id": "parkeervakken",
        "tables": [
            {
                "id": "parkeervakken",
                "fields": [
                    {"name": "id", "type": "string", "nullable": false},
                    {"name": "type", "type": "string"},
                    {"name": "soort", "type": "string"},
                    {"name": "aantal", "type": "integer"},
                    {"name": "geometry", "type": "geometry"}
                ],
                "reverseRelations": [
                    {"name": "regimes", "table": "regimes", "field": "parkeervak"}
                ]
            },
            {
                "id": "regimes",
                "fields": [
                    {"name": "id", "type": "integer", "nullable": false},
                    {"name": "parkeervak", "type": "string", "relation": "parkeervakken"},
                    {"name": "dagen", "type": "array"},
                    {"name": "eType", "type": "string"},
                    {"name": "beginTijd", "type": "time"},
                    {"name": "eindTijd", "type": "time"}
                ]
            }
        ]
    }))
}

/// A dataset proxied to `url`.
pub fn remote_schema(url: &str) -> DatasetSchema {
    parse(&json!({
        "id": "remote",
        "remote": {"url": url},
        "tables": [{
            "id": "personen",
            "fields": [
                {"name": "id", "type": "string", "nullable": false},
                {"name": "naam", "type": "string", "nullable": false},
                {"name": "geboortedatum", "type": "date"},
                {"name": "bsn", "type": "string", "auth": "BRP/R"}
            ]
        }]
    }))
}

/// Every local fixture dataset.
pub fn fixture_schemas() -> Vec<DatasetSchema> {
    vec![
        afvalwegingen_schema(),
        bommen_schema(),
        gebieden_schema(),
        parkeervakken_schema(),
    ]
}

/// A polygon square in RD New with its lower-left corner at `(x, y)`.
pub fn rd_square(x: f64, y: f64, size: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]
        ]]
    })
}

fn rows(value: Value) -> Vec<Row> {
    value
        .as_array()
        .expect("fixture rows")
        .iter()
        .map(|row| row.as_object().cloned().expect("fixture row"))
        .collect()
}

/// Rows for every fixture table, keyed by table.
pub fn fixture_rows() -> Vec<(TableRef, Vec<Row>)> {
    vec![
        (
            TableRef::new("afvalwegingen", "clusters"),
            rows(json!([
                {"id": "c1", "status": "valide"},
                {"id": "c2", "status": "invalide"}
            ])),
        ),
        (
            TableRef::new("afvalwegingen", "containers"),
            rows(json!([
                {
                    "id": 1, "cluster": "c1", "serienummer": "foobar-123",
                    "eigenaar_naam": "Dataservices", "datum_creatie": "2021-01-03",
                    "datum_leegmaken": "2021-01-03T12:13:14", "kleur": "groen",
                    "geometry": {"type": "Point", "coordinates": [121_000.0, 487_000.0]}
                },
                {
                    "id": 2, "cluster": "c1", "serienummer": "foo%bar",
                    "eigenaar_naam": "", "datum_creatie": "2021-02-01",
                    "datum_leegmaken": null, "kleur": null, "geometry": null
                },
                {
                    "id": 3, "cluster": "c2", "serienummer": "foo_bar",
                    "eigenaar_naam": null, "datum_creatie": "2020-12-31",
                    "datum_leegmaken": "2021-01-04T00:00:00", "kleur": "rood", "geometry": null
                }
            ])),
        ),
        (
            TableRef::new("gebieden", "wijken"),
            rows(json!([
                {
                    "id": "03630012052035@1", "identificatie": "03630012052035", "volgnummer": 1,
                    "naam": "Burgwallen-Nieuwe Zijde", "begin_geldigheid": "2021-01-01",
                    "eind_geldigheid": null
                }
            ])),
        ),
        (
            TableRef::new("gebieden", "buurten"),
            rows(json!([
                {
                    "id": "03630000000078@1", "identificatie": "03630000000078", "volgnummer": 1,
                    "naam": "Kop Zeedijk", "begin_geldigheid": "2021-01-01",
                    "eind_geldigheid": "2021-02-01", "ligt_in_wijk": "03630012052035@1"
                },
                {
                    "id": "03630000000078@2", "identificatie": "03630000000078", "volgnummer": 2,
                    "naam": "Kop Zeedijk Oost", "begin_geldigheid": "2021-02-01",
                    "eind_geldigheid": null, "ligt_in_wijk": "03630012052035@1"
                }
            ])),
        ),
        (
            TableRef::new("parkeervakken", "parkeervakken"),
            rows(json!([
                {
                    "id": "121138489006", "type": "File", "soort": "MULDER", "aantal": 1,
                    "geometry": rd_square(121_100.0, 489_000.0, 100.0)
                },
                {
                    "id": "121138489047", "type": "Langs", "soort": null, "aantal": 2,
                    "geometry": rd_square(122_000.0, 487_000.0, 100.0)
                }
            ])),
        ),
        (
            TableRef::new("parkeervakken", "regimes"),
            rows(json!([
                {
                    "id": 1, "parkeervak": "121138489006", "dagen": ["ma", "di", "wo", "do", "vr"],
                    "e_type": "E9", "begin_tijd": "08:00:00", "eind_tijd": "18:00:00"
                },
                {
                    "id": 2, "parkeervak": "121138489006", "dagen": ["za", "zo"],
                    "e_type": "E6b", "begin_tijd": "00:00:00", "eind_tijd": "23:59:59"
                }
            ])),
        ),
    ]
}

/// A store seeded with [`fixture_rows`].
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    for (table, rows) in fixture_rows() {
        store.replace_table(&table, rows).expect("seed store");
    }
    store
}
