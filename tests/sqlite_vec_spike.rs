mod helpers;

use cortex::facts::{bytes_to_embedding, embedding_to_bytes};
use helpers::{blend, spike, test_db};

#[test]
fn vec_extension_is_loaded() {
    let conn = test_db();
    let version: String = conn
        .query_row("SELECT vec_version()", [], |r| r.get(0))
        .unwrap();
    assert!(!version.is_empty());
}

#[test]
fn facts_vec_ranks_by_cosine_distance() {
    let conn = test_db();
    for (id, v) in [("far", spike(7)), ("near", blend(3, 4, 0.9)), ("exact", spike(3))] {
        conn.execute(
            "INSERT INTO facts_vec (fact_id, embedding) VALUES (?1, ?2)",
            rusqlite::params![id, embedding_to_bytes(&v)],
        )
        .unwrap();
    }

    let mut stmt = conn
        .prepare(
            "SELECT fact_id, distance FROM facts_vec \
             WHERE embedding MATCH ?1 ORDER BY distance LIMIT 3",
        )
        .unwrap();
    let hits: Vec<(String, f64)> = stmt
        .query_map(rusqlite::params![embedding_to_bytes(&spike(3))], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["exact", "near", "far"]);
    // cosine distance = 1 - similarity
    assert!(hits[0].1.abs() < 1e-5);
    assert!((hits[1].1 - 0.1).abs() < 1e-4);
    assert!((hits[2].1 - 1.0).abs() < 1e-5);
}

#[test]
fn stored_vector_reads_back_unchanged() {
    let conn = test_db();
    let v = blend(10, 20, 0.6);
    conn.execute(
        "INSERT INTO facts_vec (fact_id, embedding) VALUES ('f', ?1)",
        rusqlite::params![embedding_to_bytes(&v)],
    )
    .unwrap();
    let blob: Vec<u8> = conn
        .query_row("SELECT embedding FROM facts_vec WHERE fact_id = 'f'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(bytes_to_embedding(&blob), v);
}
