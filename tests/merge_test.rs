//! Merging segments with arbitrary deletions preserves every live match.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata::config::{IndexConfig, WriterConfig};
use strata::document::{DocumentBuilder, FieldValue};
use strata::error::Result;
use strata::lexical::index::{CommitOptions, Index, NoMergePolicy};
use strata::lexical::query::Query;
use strata::lexical::reader::IndexReader;
use strata::schema::{FieldConfig, Schema};
use strata::storage::MemoryStorage;

const VOCABULARY: [&str; 8] = ["amber", "basil", "cedar", "dune", "ember", "fjord", "grove", "heath"];

fn keys_matching(reader: &IndexReader, word: &str) -> Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();
    for doc_id in reader.searcher().doc_ids(&Query::term("body", word))? {
        match reader.stored_fields(doc_id)?.get("key") {
            Some(FieldValue::Text(key)) => {
                keys.insert(key.clone());
            }
            other => panic!("document {doc_id} has no key: {other:?}"),
        }
    }
    Ok(keys)
}

#[test]
fn test_merge_preserves_live_matches() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let schema = Schema::new()
        .with_field("key", FieldConfig::id())?
        .with_field("body", FieldConfig::text())?;
    let config = IndexConfig {
        writer: WriterConfig {
            max_buffered_docs: 9,
            ..Default::default()
        },
        ..Default::default()
    };
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, config)?;

    // key -> words, in insertion order
    let mut docs: Vec<(String, Vec<&str>)> = Vec::new();
    let mut writer = index.writer()?;
    writer.set_merge_policy(Arc::new(NoMergePolicy));
    for n in 0..120 {
        let words: Vec<&str> = (0..rng.random_range(1..=4))
            .map(|_| VOCABULARY[rng.random_range(0..VOCABULARY.len())])
            .collect();
        let key = format!("k{n:03}");
        writer.add_document(
            DocumentBuilder::new()
                .add_keyword("key", &key)
                .add_text("body", &words.join(" "))
                .build(),
        )?;
        docs.push((key, words));
    }
    writer.commit(CommitOptions::without_merge())?;
    assert!(index.reader()?.segment_count() > 10);

    let mut deleted = BTreeSet::new();
    let mut writer = index.writer()?;
    for (doc_id, (key, _)) in docs.iter().enumerate() {
        if rng.random_bool(0.3) {
            writer.delete_document(doc_id as u64)?;
            deleted.insert(key.clone());
        }
    }
    writer.commit(CommitOptions::without_merge())?;

    let mut expected: BTreeMap<&str, (BTreeSet<String>, f64)> = BTreeMap::new();
    for (key, words) in docs.iter().filter(|(key, _)| !deleted.contains(key)) {
        for word in words {
            let entry = expected.entry(*word).or_default();
            entry.0.insert(key.clone());
            entry.1 += 1.0;
        }
    }

    let before = index.reader()?;
    for word in VOCABULARY {
        let want = expected.get(word).map(|e| e.0.clone()).unwrap_or_default();
        assert_eq!(keys_matching(&before, word)?, want, "before merge: {word}");
    }

    index.writer()?.optimize()?;
    let after = index.reader()?;
    assert_eq!(after.segment_count(), 1);
    assert_eq!(after.doc_count_all(), (docs.len() - deleted.len()) as u64);

    for word in VOCABULARY {
        let (keys, weight) = expected.get(word).cloned().unwrap_or_default();
        assert_eq!(keys_matching(&after, word)?, keys, "after merge: {word}");
        assert_eq!(after.doc_frequency("body", word.as_bytes())?, keys.len() as u64);
        assert_eq!(after.frequency("body", word.as_bytes())?, weight);
    }
    Ok(())
}

#[test]
fn test_fully_deleted_segments_disappear() -> Result<()> {
    let schema = Schema::new().with_field("body", FieldConfig::text())?;
    let config = IndexConfig {
        writer: WriterConfig {
            max_buffered_docs: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let index = Index::create(Arc::new(MemoryStorage::new()), schema, config)?;
    let mut writer = index.writer()?;
    for text in ["gone", "gone", "kept", "kept"] {
        writer.add_document(DocumentBuilder::new().add_text("body", text).build())?;
    }
    writer.commit(CommitOptions::without_merge())?;
    assert_eq!(index.reader()?.segment_count(), 2);

    let mut writer = index.writer()?;
    assert_eq!(writer.delete_by_term("body", b"gone")?, 2);
    let summary = writer.commit(CommitOptions::without_merge())?;
    assert_eq!(summary.segment_count, 1);

    let reader = index.reader()?;
    assert_eq!(reader.doc_count_all(), 2);
    assert_eq!(reader.searcher().doc_ids(&Query::term("body", "kept"))?, vec![0, 1]);
    Ok(())
}
