use super::{Db, models::NewRecord, serialize_vector};
use rusqlite::{Error, Result, params};

impl Db {
    /// Insert one batch of records with their embeddings in a single
    /// transaction. Either every record of the batch is stored or none is.
    pub fn insert_batch(&mut self, records: &[NewRecord<'_>], embeddings: &[Vec<f32>]) -> Result<()> {
        if records.len() != embeddings.len() {
            return Err(Error::InvalidParameterCount(embeddings.len(), records.len()));
        }

        let tx = self.conn.transaction()?;
        {
            let mut insert_record = tx.prepare(
                "INSERT INTO records (record_id, source, filename, file_type, position, content) VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            let mut insert_vector =
                tx.prepare("INSERT INTO vec_records (rowid, embedding) VALUES (?, ?)")?;

            for (record, embedding) in records.iter().zip(embeddings) {
                insert_record.execute(params![
                    record.record_id,
                    record.source,
                    record.filename,
                    record.file_type,
                    record.position as i64,
                    record.content,
                ])?;
                let row_id = tx.last_insert_rowid();
                insert_vector.execute(params![row_id, serialize_vector(embedding)])?;
            }
        }
        tx.commit()
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT count(*) FROM records", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
