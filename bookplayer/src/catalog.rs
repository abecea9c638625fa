//! Book catalog: card id to book
//!
//! The book list is a CSV file, one book per row:
//!
//! ```text
//! card_id,book_id[,title[,audio_path]]
//! 1243294781,Dune,Dune by Frank Herbert
//! ```
//!
//! A header row is optional. Rows with a non-numeric card id are skipped with
//! a warning; for duplicate card ids the first row wins. `audio_path` defaults
//! to the book id, which for MPD is the book's directory in the music library.

use bookplayer_common::{Book, BookId, CardId, Error, Result};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Resolves scanned cards to books
pub trait CatalogStore: Send + Sync {
    fn resolve_by_card(&self, card_id: &CardId) -> Option<Book>;
}

/// Catalog held in memory, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct BookCatalog {
    books: HashMap<CardId, Book>,
}

/// Card ids are compared in canonical decimal form ("007" == "7")
fn canonical_card_id(raw: &str) -> Option<CardId> {
    raw.trim().parse::<u128>().ok().map(|v| CardId::new(v.to_string()))
}

impl BookCatalog {
    pub fn from_books(books: impl IntoIterator<Item = Book>) -> Self {
        let mut catalog = Self::default();
        for book in books {
            catalog.insert(book);
        }
        catalog
    }

    fn insert(&mut self, book: Book) {
        if let Some(existing) = self.books.get(&book.card_id) {
            warn!(
                "Duplicate card id {} ({} and {}), keeping {}",
                book.card_id, existing.id, book.id, existing.id
            );
            return;
        }
        self.books.insert(book.card_id.clone(), book);
    }

    /// Load the book list file
    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Config(format!("Cannot open book list {:?}: {}", path, e)))?;
        let catalog = Self::parse_csv(file)?;
        info!("Loaded {} books from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Parse book list rows from any reader
    pub fn parse_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut catalog = Self::default();
        for (line, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| Error::Config(format!("Book list: {}", e)))?;

            let raw_card = record.get(0).unwrap_or_default();
            if line == 0 && raw_card.eq_ignore_ascii_case("card_id") {
                continue;
            }
            let Some(card_id) = canonical_card_id(raw_card) else {
                warn!("Invalid card id {:?} on book list line {}", raw_card, line + 1);
                continue;
            };
            let book_id = match record.get(1) {
                Some(id) if !id.is_empty() => BookId::new(id),
                _ => {
                    warn!("Missing book id for card {} on line {}", card_id, line + 1);
                    continue;
                }
            };

            let title = record
                .get(2)
                .filter(|t| !t.is_empty())
                .unwrap_or(book_id.as_str())
                .to_string();
            let audio_path = record
                .get(3)
                .filter(|p| !p.is_empty())
                .unwrap_or(book_id.as_str())
                .to_string();

            catalog.insert(Book {
                id: book_id,
                title,
                card_id,
                audio_path,
            });
        }

        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl CatalogStore for BookCatalog {
    fn resolve_by_card(&self, card_id: &CardId) -> Option<Book> {
        let key = canonical_card_id(card_id.as_str()).unwrap_or_else(|| card_id.clone());
        self.books.get(&key).cloned()
    }
}
