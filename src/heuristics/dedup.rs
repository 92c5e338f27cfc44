use std::collections::{HashMap, HashSet};

use crate::block::Block;

/// Group non-must-keep blocks by fingerprint and keep only the latest
/// timestamp in each group. Must-keep blocks pass through untouched —
/// never grouped, never dropped, regardless of fingerprint collisions.
/// A non-must-keep group whose fingerprint matches a must-keep block's
/// content is dropped entirely: that content already survives via the
/// must-keep block, so none of its non-must-keep duplicates are needed.
pub fn deduplicate(blocks: Vec<Block>) -> Vec<Block> {
    let mut must_keep = Vec::new();
    let mut must_keep_fingerprints: HashSet<String> = HashSet::new();
    let mut groups: HashMap<String, Vec<Block>> = HashMap::new();

    for block in blocks {
        if block.must_keep {
            must_keep_fingerprints.insert(block.fingerprint());
            must_keep.push(block);
        } else {
            groups.entry(block.fingerprint()).or_default().push(block);
        }
    }

    let mut deduped: Vec<Block> = groups
        .into_iter()
        .filter(|(fingerprint, _)| !must_keep_fingerprints.contains(fingerprint))
        .map(|(_, mut group)| {
            group.sort_by_key(|b| std::cmp::Reverse(b.timestamp));
            group.into_iter().next().expect("group is never empty")
        })
        .collect();

    deduped.extend(must_keep);
    deduped.sort_by_key(|b| b.index().unwrap_or(0));
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use chrono::{Duration, Utc};

    #[test]
    fn duplicate_non_must_keep_collapses_to_one() {
        let blocks = vec![
            Block::new(BlockType::User, "hello", 1),
            Block::new(BlockType::User, "hello", 1),
            Block::new(BlockType::User, "hello", 1),
        ];
        assert_eq!(deduplicate(blocks).len(), 1);
    }

    #[test]
    fn must_keep_blocks_are_never_removed_even_if_duplicated() {
        let blocks = vec![
            Block::new(BlockType::System, "same", 1).must_keep(true),
            Block::new(BlockType::System, "same", 1).must_keep(true),
        ];
        assert_eq!(deduplicate(blocks).len(), 2);
    }

    #[test]
    fn keeps_most_recent_timestamp_in_group() {
        let mut older = Block::new(BlockType::User, "dup", 1);
        older.timestamp = Some(Utc::now() - Duration::hours(1));
        older.metadata.insert("tag".to_string(), serde_json::Value::from("older"));

        let newer = Block::new(BlockType::User, "dup", 1);

        let deduped = deduplicate(vec![older, newer]);
        assert_eq!(deduped.len(), 1);
        assert!(deduped[0].metadata.get("tag").is_none());
    }

    #[test]
    fn drops_non_must_keep_duplicates_of_a_must_keep_blocks_content() {
        let blocks = vec![
            Block::new(BlockType::User, "Hello", 1),
            Block::new(BlockType::User, "Hello", 1),
            Block::new(BlockType::User, "Hello", 1).must_keep(true),
        ];
        let deduped = deduplicate(blocks);
        assert_eq!(deduped.len(), 1);
        assert!(deduped[0].must_keep);
    }

    #[test]
    fn preserves_original_order_via_index() {
        let mut a = Block::new(BlockType::User, "a", 1);
        a.set_index(0);
        let mut b = Block::new(BlockType::User, "b", 1);
        b.set_index(1);
        let deduped = deduplicate(vec![b, a]);
        assert_eq!(deduped[0].content, "a");
        assert_eq!(deduped[1].content, "b");
    }
}
