use super::*;

use crate::entry::{Entry, View};
use crate::quickfit::QuickFit;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::HashMap;

/// Walk the whole trie and check its structural invariants.
fn validate_trie(m: &HamtMap) {
    assert_eq!(m.values.len(), m.len, "one value slot per distinct key");

    let Some(trie) = m.trie.as_ref() else {
        assert_eq!(m.len, 0, "keys without a trie");
        return;
    };

    let mut stack = vec![(trie.root_entry(), 0u32, 0u64)];
    let mut leaves = 0usize;
    let mut blocks = 1usize;

    while let Some((entry, shift, prefix)) = stack.pop() {
        match entry.view(shift) {
            View::Leaf { key, value } => {
                leaves += 1;
                assert!(value < m.values.len(), "dangling value index");
                let mask = if shift >= HASH_BITS {
                    u64::MAX
                } else {
                    (1u64 << shift) - 1
                };
                assert_eq!(
                    (m.config.hash)(key) & mask,
                    prefix,
                    "leaf {key} sits under the wrong symbol path"
                );
            }
            View::Node { bitmap, base } => {
                assert!(shift < HASH_BITS, "node below the last hash bit");
                assert!(bitmap.len() >= 1, "empty node");
                assert_eq!(
                    trie.alloc.block_len(base),
                    Ok(bitmap.len()),
                    "child block length must equal bitmap popcount"
                );
                blocks += 1;
                for (i, sym) in bitmap.symbols().enumerate() {
                    let child = *trie.alloc.slot(base, i);
                    stack.push((child, shift + SYMBOL_WIDTH, prefix | (u64::from(sym) << shift)));
                }
            }
            View::Bucket { len, base } => {
                assert!(len >= 2, "bucket with {len} pairs");
                assert_eq!(trie.alloc.block_len(base), Ok(len));
                blocks += 1;
                for i in 0..len {
                    let pair = *trie.alloc.slot(base, i);
                    assert!(pair.is_leaf(), "bucket holds a linked entry");
                    stack.push((pair, shift, prefix));
                }
            }
        }
    }

    assert_eq!(leaves, m.len, "reachable leaf count must match HamtMap::len");
    assert_eq!(
        blocks,
        trie.alloc.stats().live_blocks,
        "every live block must be reachable"
    );
}

fn key_strategy() -> BoxedStrategy<Key> {
    prop_oneof![
        // Dense: shares long symbol prefixes.
        -64i64..64,
        // Same low bits, so chains of single-child nodes.
        (0i64..64).prop_map(|k| k << 55),
        any::<i64>(),
    ]
    .boxed()
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 3)]
    Insert(#[proptest(strategy = "key_strategy()")] Key, Value),
    Get(#[proptest(strategy = "key_strategy()")] Key),
}

#[derive(Clone, Debug, Arbitrary)]
enum AllocOp {
    #[proptest(weight = 3)]
    Allocate(#[proptest(strategy = "(1usize..=CARDINALITY).boxed()")] usize),
    Release(prop::sample::Index),
}

fn check_model(t: &HamtMap, m: &HashMap<Key, Value>) {
    validate_trie(t);
    let mut got: Vec<(Key, Value)> = t.iter().map(|(k, v)| (k, *v)).collect();
    got.sort_unstable();
    let mut expected: Vec<(Key, Value)> = m.iter().map(|(k, v)| (*k, *v)).collect();
    expected.sort_unstable();
    assert_eq!(got, expected);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in prop::collection::vec(any::<Op>(), 0..=2000)) {
        let mut t = HamtMap::new();
        let mut m: HashMap<Key, Value> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.insert(key, value).unwrap();
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get(key).copied(), m.get(&key).copied());
                }
            }
            prop_assert_eq!(t.len(), m.len());
        }

        check_model(&t, &m);
    }

    #[test]
    fn prop_equivalence_weak_hash(
        inserts in prop::collection::vec((0i64..48, any::<Value>()), 0..=300),
        probes in prop::collection::vec(-8i64..56, 0..=50),
    ) {
        // At most 16 keys per hash, so buckets never overflow.
        let mut t = HamtMap::with_config(Config {
            hash: |k| k.rem_euclid(3) as u64,
            ..Config::default()
        })
        .unwrap();
        let mut m: HashMap<Key, Value> = HashMap::new();

        for (key, value) in inserts {
            prop_assert_eq!(t.insert(key, value).unwrap(), m.insert(key, value));
        }
        for key in probes {
            prop_assert_eq!(t.get(key).copied(), m.get(&key).copied());
        }

        check_model(&t, &m);
    }

    #[test]
    fn prop_allocator_never_hands_out_live_blocks(
        ops in prop::collection::vec(any::<AllocOp>(), 0..=1000),
    ) {
        let mut a: QuickFit<Entry> = QuickFit::new(64, CARDINALITY, None).unwrap();
        let mut live: Vec<(BlockRef, usize, i64)> = Vec::new();
        let mut released: HashMap<usize, Vec<BlockRef>> = HashMap::new();

        for (round, op) in ops.into_iter().enumerate() {
            let tag = round as i64;
            match op {
                AllocOp::Allocate(n) => {
                    let b = a.allocate(n).unwrap();
                    prop_assert!(live.iter().all(|(l, _, _)| *l != b), "live block {:?} reissued", b);

                    // Reuse comes from the same size class only.
                    let recycled = released.values().flatten().any(|r| *r == b);
                    if recycled {
                        let same_class = released.entry(n).or_default();
                        prop_assert!(same_class.contains(&b), "{:?} reused across size classes", b);
                        same_class.retain(|r| *r != b);
                    }

                    for i in 0..n {
                        *a.slot_mut(b, i) = Entry::leaf(tag, i);
                    }
                    live.push((b, n, tag));
                }
                AllocOp::Release(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let (b, n, tag) = live.swap_remove(index.index(live.len()));
                    for i in 0..n {
                        prop_assert_eq!(*a.slot(b, i), Entry::leaf(tag, i));
                    }
                    a.release(b).unwrap();
                    released.entry(n).or_default().push(b);
                }
            }
        }

        for &(b, n, tag) in &live {
            for i in 0..n {
                prop_assert_eq!(*a.slot(b, i), Entry::leaf(tag, i));
            }
        }
        prop_assert_eq!(a.stats().live_blocks, live.len());
    }
}

#[test]
fn exhaustive_insert_order_small_set() {
    // Keys chosen to exercise chains, growth at the root and deep splits.
    let keys: Vec<Key> = vec![0, 1, 32, 33, 1 << 30, -1];

    fn permute(items: &mut Vec<Key>, k: usize, f: &mut impl FnMut(&[Key])) {
        if k == items.len() {
            f(items.as_slice());
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            permute(items, k + 1, f);
            items.swap(k, i);
        }
    }

    let mut items = keys.clone();
    permute(&mut items, 0, &mut |perm| {
        let mut t = HamtMap::new();
        for &k in perm {
            assert_eq!(t.insert(k, k ^ 0x55).unwrap(), None);
        }
        validate_trie(&t);
        for &k in &keys {
            assert_eq!(t.get(k), Some(&(k ^ 0x55)), "perm {perm:?}");
        }
    });
}
