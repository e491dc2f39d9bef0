//! Inventory counters and the movement history log.
//! -------------------------------------------------
//! Two Parquet files under the data root: `inventory.parquet` holds one row
//! per item (id, name, used) and `history.parquet` an append-only log of
//! changes. All mutation is read-modify-write of the whole file under the
//! store mutex; counter updates are last-write-wins. History rows are free
//! text and are not cross-checked against item names.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use polars::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub used: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub item: String,
    pub change: i64,
    pub timestamp: String,
}

pub struct InventoryInner {
    items_path: PathBuf,
    history_path: PathBuf,
}

/// Shared handle to the inventory store. Clones share one mutex.
#[derive(Clone)]
pub struct InventoryStore(pub Arc<Mutex<InventoryInner>>);

fn mk_items_df() -> DataFrame {
    let ids: Series = Series::new("id".into(), Vec::<i64>::new());
    let names: Series = Series::new("name".into(), Vec::<String>::new());
    let used: Series = Series::new("used".into(), Vec::<i64>::new());
    DataFrame::new(vec![ids.into(), names.into(), used.into()]).unwrap()
}

fn mk_history_df() -> DataFrame {
    let ids: Series = Series::new("id".into(), Vec::<i64>::new());
    let items: Series = Series::new("item".into(), Vec::<String>::new());
    let changes: Series = Series::new("change".into(), Vec::<i64>::new());
    let timestamps: Series = Series::new("timestamp".into(), Vec::<String>::new());
    DataFrame::new(vec![ids.into(), items.into(), changes.into(), timestamps.into()]).unwrap()
}

fn read_frame(path: &Path, empty: fn() -> DataFrame) -> Result<DataFrame> {
    if !path.exists() { return Ok(empty()); }
    let file = std::fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    Ok(df)
}

fn write_frame(path: &Path, mut df: DataFrame) -> Result<()> {
    if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
    let mut f = std::fs::File::create(path)?;
    ParquetWriter::new(&mut f).finish(&mut df)?;
    Ok(())
}

fn str_at(df: &DataFrame, col: &str, i: usize) -> Result<String> {
    match df.column(col)?.get(i)? {
        AnyValue::String(s) => Ok(s.to_string()),
        AnyValue::StringOwned(s) => Ok(s.to_string()),
        other => Err(anyhow!("unexpected value in column '{}': {:?}", col, other)),
    }
}

fn int_at(df: &DataFrame, col: &str, i: usize) -> Result<i64> {
    match df.column(col)?.get(i)? {
        AnyValue::Int64(v) => Ok(v),
        AnyValue::Int32(v) => Ok(i64::from(v)),
        other => Err(anyhow!("unexpected value in column '{}': {:?}", col, other)),
    }
}

fn max_id(df: &DataFrame) -> Result<i64> {
    let mut max = 0i64;
    for i in 0..df.height() {
        let v = int_at(df, "id", i)?;
        if v > max { max = v; }
    }
    Ok(max)
}

impl InventoryStore {
    pub fn open(data_root: &str) -> InventoryStore {
        let root = Path::new(data_root);
        InventoryStore(Arc::new(Mutex::new(InventoryInner {
            items_path: root.join("inventory.parquet"),
            history_path: root.join("history.parquet"),
        })))
    }

    /// Create any of `names` that do not exist yet, ids continuing from the
    /// highest present. Existing items keep their id and counter.
    pub fn seed_items(&self, names: &[&str]) -> Result<()> {
        let inner = self.0.lock();
        let mut df = read_frame(&inner.items_path, mk_items_df)?;
        for name in names {
            let mut present = false;
            for i in 0..df.height() {
                let existing = str_at(&df, "name", i)?;
                if existing == *name { present = true; break; }
            }
            if present { continue; }
            let next = max_id(&df)? + 1;
            let new = DataFrame::new(vec![
                Series::new("id".into(), vec![next]).into(),
                Series::new("name".into(), vec![name.to_string()]).into(),
                Series::new("used".into(), vec![0i64]).into(),
            ])?;
            df = if df.height() == 0 { new } else { df.vstack(&new)? };
        }
        write_frame(&inner.items_path, df)
    }

    /// All items in id order.
    pub fn items(&self) -> Result<Vec<Item>> {
        let inner = self.0.lock();
        let df = read_frame(&inner.items_path, mk_items_df)?;
        let mut out = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            out.push(Item {
                id: int_at(&df, "id", i)?,
                name: str_at(&df, "name", i)?,
                used: int_at(&df, "used", i)?,
            });
        }
        out.sort_by_key(|it| it.id);
        Ok(out)
    }

    /// Overwrite an item's counter. Returns false when the id is unknown.
    /// Concurrent writers resolve last-write-wins under the store lock.
    pub fn set_used(&self, item_id: i64, used: i64) -> Result<bool> {
        let inner = self.0.lock();
        let mut df = read_frame(&inner.items_path, mk_items_df)?;
        // Capture the current name by scanning
        let mut name: Option<String> = None;
        for i in 0..df.height() {
            if int_at(&df, "id", i)? == item_id {
                name = Some(str_at(&df, "name", i)?);
                break;
            }
        }
        let Some(name) = name else { return Ok(false); };
        // Remove the existing row and append the updated one
        let id_col = df.column("id")?.clone();
        if let Some(series) = id_col.as_series() {
            let mask: ChunkedArray<BooleanType> = series.iter().map(|av| match av {
                AnyValue::Int64(v) => v != item_id,
                AnyValue::Int32(v) => i64::from(v) != item_id,
                _ => true,
            }).collect();
            df = df.filter(&mask)?;
        }
        let updated = DataFrame::new(vec![
            Series::new("id".into(), vec![item_id]).into(),
            Series::new("name".into(), vec![name]).into(),
            Series::new("used".into(), vec![used]).into(),
        ])?;
        let stacked = if df.height() == 0 { updated } else { df.vstack(&updated)? };
        write_frame(&inner.items_path, stacked)?;
        Ok(true)
    }

    /// Append a change record with the next id. `item` is free text and
    /// `timestamp` is stored exactly as supplied.
    pub fn append_history(&self, item: &str, change: i64, timestamp: &str) -> Result<()> {
        let inner = self.0.lock();
        let df = read_frame(&inner.history_path, mk_history_df)?;
        let next = max_id(&df)? + 1;
        let new = DataFrame::new(vec![
            Series::new("id".into(), vec![next]).into(),
            Series::new("item".into(), vec![item.to_string()]).into(),
            Series::new("change".into(), vec![change]).into(),
            Series::new("timestamp".into(), vec![timestamp.to_string()]).into(),
        ])?;
        if df.height() == 0 { write_frame(&inner.history_path, new) } else { let stacked = df.vstack(&new)?; write_frame(&inner.history_path, stacked) }
    }

    /// All history entries, newest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        let inner = self.0.lock();
        let df = read_frame(&inner.history_path, mk_history_df)?;
        let mut out = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            out.push(HistoryEntry {
                id: int_at(&df, "id", i)?,
                item: str_at(&df, "item", i)?,
                change: int_at(&df, "change", i)?,
                timestamp: str_at(&df, "timestamp", i)?,
            });
        }
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    /// Remove one history entry. Returns false when the id is unknown.
    pub fn delete_history(&self, entry_id: i64) -> Result<bool> {
        let inner = self.0.lock();
        let mut df = read_frame(&inner.history_path, mk_history_df)?;
        let mut found = false;
        for i in 0..df.height() {
            if int_at(&df, "id", i)? == entry_id { found = true; break; }
        }
        if !found { return Ok(false); }
        let id_col = df.column("id")?.clone();
        if let Some(series) = id_col.as_series() {
            let mask: ChunkedArray<BooleanType> = series.iter().map(|av| match av {
                AnyValue::Int64(v) => v != entry_id,
                AnyValue::Int32(v) => i64::from(v) != entry_id,
                _ => true,
            }).collect();
            df = df.filter(&mask)?;
        }
        write_frame(&inner.history_path, df)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn seeding_is_idempotent_per_name() -> Result<()> {
        let dir = tempdir()?;
        let store = InventoryStore::open(dir.path().to_str().unwrap());
        store.seed_items(&["GPS Units", "Card Readers"])?;
        store.set_used(1, 7)?;
        store.seed_items(&["GPS Units", "Card Readers"])?;
        let items = store.items()?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Item { id: 1, name: "GPS Units".into(), used: 7 });
        assert_eq!(items[1], Item { id: 2, name: "Card Readers".into(), used: 0 });
        // New names continue from the highest id
        store.seed_items(&["Chargers"])?;
        assert_eq!(store.items()?[2], Item { id: 3, name: "Chargers".into(), used: 0 });
        Ok(())
    }

    #[test]
    fn set_used_overwrites_and_reports_missing() -> Result<()> {
        let dir = tempdir()?;
        let store = InventoryStore::open(dir.path().to_str().unwrap());
        store.seed_items(&["GPS Units", "Card Readers"])?;
        assert!(store.set_used(1, 5)?);
        assert!(store.set_used(1, 2)?);
        assert_eq!(store.items()?[0].used, 2);
        assert!(!store.set_used(99, 1)?);
        // No bound is enforced on the counter
        assert!(store.set_used(2, -4)?);
        assert_eq!(store.items()?[1].used, -4);
        Ok(())
    }

    #[test]
    fn counters_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = InventoryStore::open(dir.path().to_str().unwrap());
            store.seed_items(&["GPS Units"])?;
            store.set_used(1, 9)?;
        }
        let reopened = InventoryStore::open(dir.path().to_str().unwrap());
        assert_eq!(reopened.items()?[0].used, 9);
        Ok(())
    }

    #[test]
    fn history_orders_newest_first_and_deletes_by_id() -> Result<()> {
        let dir = tempdir()?;
        let store = InventoryStore::open(dir.path().to_str().unwrap());
        store.append_history("GPS Units", 2, "2025-01-01 10:00")?;
        store.append_history("Card Readers", -1, "2025-01-02 11:00")?;
        store.append_history("Unlisted Thing", 4, "2025-01-03 12:00")?;
        let hist = store.history()?;
        assert_eq!(hist.iter().map(|h| h.id).collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(hist[0].item, "Unlisted Thing");
        assert_eq!(hist[2].change, 2);

        assert!(store.delete_history(2)?);
        assert!(!store.delete_history(2)?);
        assert!(!store.delete_history(99)?);
        let after = store.history()?;
        assert_eq!(after.iter().map(|h| h.id).collect::<Vec<_>>(), vec![3, 1]);
        // The next id continues from the highest remaining entry
        store.append_history("GPS Units", 1, "2025-01-04 09:00")?;
        assert_eq!(store.history()?[0].id, 4);
        Ok(())
    }
}
