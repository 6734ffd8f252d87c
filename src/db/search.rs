use super::{Db, models::SearchHit, serialize_vector};
use rusqlite::{Result, params};

fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchHit> {
    let distance: f64 = row.get(6)?;
    Ok(SearchHit {
        record_id: row.get(0)?,
        content: row.get(1)?,
        source: row.get(2)?,
        filename: row.get(3)?,
        file_type: row.get(4)?,
        position: row.get::<_, i64>(5)? as usize,
        similarity: 1.0 - (distance / 2.0),
    })
}

impl Db {
    /// Nearest records by cosine distance, most similar first.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                r.record_id,
                r.content,
                r.source,
                r.filename,
                r.file_type,
                r.position,
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_records v
            JOIN records r ON v.rowid = r.id
            ORDER BY distance ASC, r.id ASC
            LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            map_search_row,
        )?;
        rows.collect()
    }
}
