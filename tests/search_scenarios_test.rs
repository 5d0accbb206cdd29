//! End-to-end indexing and search scenarios.

use std::ops::Bound;
use std::sync::Arc;

use strata::config::{IndexConfig, WriterConfig};
use strata::document::{DocumentBuilder, FieldValue};
use strata::error::Result;
use strata::lexical::index::{CommitOptions, Index};
use strata::lexical::core::column::{ColumnKind, ColumnValue};
use strata::lexical::query::{Collapse, Query, SortKey};
use strata::lexical::search::SearchRequest;
use strata::schema::{FieldConfig, Schema};
use strata::storage::{FileStorage, MemoryStorage, StorageConfig};
use tempfile::TempDir;

fn config(max_buffered_docs: usize) -> IndexConfig {
    IndexConfig {
        writer: WriterConfig {
            max_buffered_docs,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_basic_index_and_search() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(FileStorage::new(dir.path(), StorageConfig::default())?);
    let schema = Schema::new()
        .with_field("id", FieldConfig::id())?
        .with_field("text", FieldConfig::text().stored(true))?;
    let index = Index::create(storage, schema, IndexConfig::default())?;

    let mut writer = index.writer()?;
    for (id, text) in [
        ("1", "alfa bravo charlie"),
        ("2", "alfa bravo delta"),
        ("3", "alfa charlie echo"),
    ] {
        writer.add_document(DocumentBuilder::new().add_keyword("id", id).add_text("text", text).build())?;
    }
    writer.commit(CommitOptions::default())?;

    let searcher = index.searcher()?;
    assert_eq!(searcher.reader().doc_frequency("text", b"charlie")?, 2);

    let results = searcher.search(&Query::term("text", "charlie"), 10)?;
    assert_eq!(results.total, 2);
    let ids: Vec<FieldValue> = results
        .hits
        .iter()
        .map(|hit| searcher.reader().stored_fields(hit.doc_id).map(|f| f["id"].clone()))
        .collect::<Result<_>>()?;
    assert_eq!(ids, vec![FieldValue::Text("1".into()), FieldValue::Text("3".into())]);
    Ok(())
}

#[test]
fn test_update_via_unique_field() -> Result<()> {
    let schema = Schema::new()
        .with_field("key", FieldConfig::keyword().unique(true))?
        .with_field("body", FieldConfig::text())?;
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, IndexConfig::default())?;

    let mut writer = index.writer()?;
    writer.add_document(DocumentBuilder::new().add_keyword("key", "A").add_text("body", "first").build())?;
    writer.commit(CommitOptions::default())?;

    for round in 0..10 {
        let mut writer = index.writer()?;
        writer.update_document(
            DocumentBuilder::new()
                .add_keyword("key", "A")
                .add_text("body", &format!("round {round}"))
                .build(),
        )?;
        writer.commit(CommitOptions::default())?;
    }

    let reader = index.reader()?;
    assert_eq!(reader.doc_count(), 1);
    let searcher = reader.searcher();
    assert_eq!(searcher.count(&Query::term("body", "9"))?, 1);
    assert_eq!(searcher.count(&Query::term("body", "first"))?, 0);
    Ok(())
}

#[test]
fn test_deletion_and_reclaim() -> Result<()> {
    let schema = Schema::new().with_field("n", FieldConfig::numeric())?;
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, config(3))?;

    let mut writer = index.writer()?;
    for n in 0..9 {
        writer.add_document(DocumentBuilder::new().add_integer("n", n).build())?;
    }
    let summary = writer.commit(CommitOptions::without_merge())?;
    assert_eq!(summary.segment_count, 3);

    let mut writer = index.writer()?;
    for doc_id in [0, 4, 5, 7] {
        writer.delete_document(doc_id)?;
    }
    writer.commit(CommitOptions::without_merge())?;
    assert_eq!(index.reader()?.doc_count(), 5);
    assert_eq!(index.reader()?.doc_count_all(), 9);

    let summary = index.writer()?.optimize()?;
    assert_eq!(summary.segment_count, 1);

    let reader = index.reader()?;
    assert_eq!(reader.segment_count(), 1);
    assert_eq!(reader.doc_count_all(), 5);
    assert_eq!(reader.doc_count(), 5);
    assert!(!reader.has_deletions());

    let survivors: Vec<i64> = reader
        .all_doc_ids()
        .map(|doc_id| -> Result<i64> {
            match reader.stored_fields(doc_id)?.get("n") {
                Some(FieldValue::Integer(n)) => Ok(*n),
                other => panic!("unexpected stored value {other:?}"),
            }
        })
        .collect::<Result<_>>()?;
    assert_eq!(survivors, vec![1, 2, 3, 6, 8]);
    Ok(())
}

#[test]
fn test_range_query_boundaries() -> Result<()> {
    let schema = Schema::new().with_field("num", FieldConfig::numeric())?;
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, config(64))?;
    let mut writer = index.writer()?;
    for n in 0..400 {
        writer.add_document(DocumentBuilder::new().add_integer("num", n).build())?;
    }
    writer.commit(CommitOptions::default())?;

    let searcher = index.searcher()?;
    let inclusive = searcher.doc_ids(&Query::numeric_range("num", Bound::Included(10), Bound::Included(390)))?;
    assert_eq!(inclusive, (10..=390).collect::<Vec<u64>>());

    let exclusive = searcher.doc_ids(&Query::numeric_range("num", Bound::Excluded(10), Bound::Excluded(390)))?;
    assert_eq!(exclusive, (11..=389).collect::<Vec<u64>>());

    let open = searcher.count(&Query::numeric_range("num", Bound::Unbounded, Bound::Excluded(0)))?;
    assert_eq!(open, 0);
    Ok(())
}

#[test]
fn test_delete_by_term_is_idempotent() -> Result<()> {
    let schema = Schema::new().with_field("tag", FieldConfig::keyword())?;
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, IndexConfig::default())?;

    let mut writer = index.writer()?;
    for tag in ["a", "b", "a"] {
        writer.add_document(DocumentBuilder::new().add_keyword("tag", tag).build())?;
    }
    writer.commit(CommitOptions::default())?;
    let generation = index.generation();
    let files = index.storage().list_files()?;

    let mut writer = index.writer()?;
    assert_eq!(writer.delete_by_term("tag", b"missing")?, 0);
    assert_eq!(writer.delete_by_term("nofield", b"a")?, 0);
    let summary = writer.commit(CommitOptions::default())?;
    assert!(!summary.changed);
    assert_eq!(index.generation(), generation);
    assert_eq!(index.storage().list_files()?, files);

    let mut writer = index.writer()?;
    assert_eq!(writer.delete_by_term("tag", b"a")?, 2);
    assert_eq!(writer.delete_by_term("tag", b"a")?, 0);
    writer.commit(CommitOptions::default())?;
    assert_eq!(index.reader()?.doc_count(), 1);
    Ok(())
}

#[test]
fn test_boolean_output_is_ascending() -> Result<()> {
    let schema = Schema::new().with_field("body", FieldConfig::text())?;
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, config(4))?;
    let mut writer = index.writer()?;
    for n in 0..30u32 {
        let mut words = Vec::new();
        if n % 2 == 0 {
            words.push("two");
        }
        if n % 3 == 0 {
            words.push("three");
        }
        if n % 5 == 0 {
            words.push("five");
        }
        words.push("any");
        writer.add_document(DocumentBuilder::new().add_text("body", &words.join(" ")).build())?;
    }
    writer.commit(CommitOptions::without_merge())?;

    let searcher = index.searcher()?;
    assert!(searcher.reader().segment_count() > 1);

    let and = searcher.doc_ids(&Query::and(vec![Query::term("body", "two"), Query::term("body", "three")]))?;
    assert_eq!(and, vec![0, 6, 12, 18, 24]);

    let or = searcher.doc_ids(&Query::or(vec![Query::term("body", "three"), Query::term("body", "five")]))?;
    let expected: Vec<u64> = (0..30).filter(|n| n % 3 == 0 || n % 5 == 0).collect();
    assert_eq!(or, expected);

    let not = searcher.doc_ids(&Query::and_not(Query::term("body", "five"), Query::term("body", "two")))?;
    assert_eq!(not, vec![5, 15, 25]);

    let prefix = searcher.count(&Query::prefix("body", "t"))?;
    assert_eq!(prefix, 20);
    Ok(())
}

#[test]
fn test_phrase_search_across_segments() -> Result<()> {
    let schema = Schema::new().with_field("body", FieldConfig::text())?;
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, config(2))?;
    let mut writer = index.writer()?;
    for text in [
        "the quick brown fox",
        "brown quick the",
        "quick red brown",
        "a quick brown dog",
        "quick quick brown brown",
    ] {
        writer.add_document(DocumentBuilder::new().add_text("body", text).build())?;
    }
    writer.commit(CommitOptions::without_merge())?;

    let searcher = index.searcher()?;
    let exact = searcher.doc_ids(&Query::phrase("body", ["quick", "brown"]))?;
    assert_eq!(exact, vec![0, 3, 4]);
    let sloppy = searcher.doc_ids(&Query::phrase("body", ["quick", "brown"]).with_slop(2))?;
    assert_eq!(sloppy, vec![0, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_sorted_pages_with_mask_and_collapse() -> Result<()> {
    let schema = Schema::new()
        .with_field("key", FieldConfig::id().column(ColumnKind::Bytes))?
        .with_field("group", FieldConfig::new().column(ColumnKind::Int))?;
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, config(4))?;
    let mut writer = index.writer()?;
    for (n, key) in "iacgbehdfjlk".chars().enumerate() {
        let key = key.to_string();
        writer.add_document(
            DocumentBuilder::new()
                .add_keyword("key", &key)
                .column("key", ColumnValue::Bytes(key.clone().into_bytes()))
                .column("group", ColumnValue::Int(n as i64 % 3))
                .build(),
        )?;
    }
    writer.commit(CommitOptions::without_merge())?;

    let searcher = index.searcher()?;
    assert!(searcher.reader().segment_count() > 1);
    let keys = |ids: Vec<u64>| -> Result<String> {
        ids.into_iter()
            .map(|id| {
                let fields = searcher.reader().stored_fields(id)?;
                Ok(match &fields["key"] {
                    FieldValue::Text(text) => text.clone(),
                    other => format!("{other:?}"),
                })
            })
            .collect()
    };

    let request = SearchRequest::new(Query::every()).sort_by("key", false);
    let first = searcher.execute_page(&request, 1, 5)?;
    assert_eq!(keys(first.doc_ids())?, "abcde");
    assert_eq!(first.page_count, 3);
    let last = searcher.execute_page(&request, 3, 5)?;
    assert_eq!(keys(last.doc_ids())?, "kl");
    assert!(last.is_last_page());

    let vowels = searcher.doc_set(&Query::or(vec![
        Query::term("key", "a"),
        Query::term("key", "e"),
        Query::term("key", "i"),
    ]))?;
    let masked = searcher.execute_page(&request.clone().mask(vowels), 1, 5)?;
    assert_eq!(masked.total, 9);
    assert_eq!(keys(masked.doc_ids())?, "bcdfg");

    // Lowest key of each of the three groups.
    let collapsed = request.collapse(Collapse::new("group").order(SortKey::asc("key")));
    let results = searcher.execute(&collapsed)?;
    assert_eq!(results.total, 3);
    assert_eq!(keys(results.doc_ids())?, "acg");
    Ok(())
}
