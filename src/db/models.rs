/// A record about to be inserted; borrows from the ingested chunk.
#[derive(Debug, Clone)]
pub struct NewRecord<'a> {
    pub record_id: &'a str,
    pub source: &'a str,
    pub filename: &'a str,
    pub file_type: &'a str,
    pub position: usize,
    pub content: &'a str,
}

/// A stored record returned by a nearest-neighbour search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record_id: String,
    pub content: String,
    pub source: String,
    pub filename: String,
    pub file_type: String,
    pub position: usize,
    /// `1 - cosine_distance / 2`, in `[0, 1]`.
    pub similarity: f64,
}
