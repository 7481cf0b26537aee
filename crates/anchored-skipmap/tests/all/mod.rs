macro_rules! tests_for_all_backends {
    ($map:ident $(,)?) => {
        // ================================
        //  Empty Map
        // ================================

        #[test]
        fn empty_map() {
            let map = $map::<u32, u32>::new();

            assert!(map.is_empty());
            assert_eq!(map.len(), 0);
            assert!(map.find(&0).is_end());
            assert!(map.lower_bound(&0).is_end());
            assert!(map.upper_bound(&0).is_end());
            assert!(map.begin().is_end());
            assert_eq!(map.begin(), map.end());
            assert!(map.iter().next().is_none());
            assert!(!map.erase(&0));
            assert_eq!(map.pending_reclamation(), 0);

            assert_eq!(format!("{map:?}"), "{}");
        }

        #[test]
        fn end_cursor() {
            let map = $map::<u32, u32>::new();
            map.insert(1, 10);

            let mut end = map.end();
            assert!(end.is_end());
            assert!(!end.is_stale());
            assert!(end.key().is_none());
            assert!(end.value().is_none());
            assert!(end.entry().is_none());

            end.advance();
            assert!(end.is_end());

            let _check_that_debug_works = format!("{end:?}");
        }

        // ================================
        //  Insertion and Lookup
        // ================================

        #[test]
        fn round_trip() {
            let map = $map::new();

            for key in 0..100_u32 {
                let (cursor, inserted) = map.insert(key, key * 10);
                assert!(inserted);
                assert_eq!(cursor.entry(), Some((&key, &(key * 10))));
            }

            assert_eq!(map.len(), 100);

            for key in 0..100 {
                let cursor = map.find(&key);
                assert_eq!(cursor.key(), Some(&key));
                assert_eq!(cursor.value(), Some(&(key * 10)));
                assert!(map.contains_key(&key));
                assert_eq!(map.get(&key), Some(key * 10));
            }

            assert!(map.find(&100).is_end());
            assert!(!map.contains_key(&100));
            assert_eq!(map.get(&1000), None);

            for key in 0..100 {
                assert!(map.erase(&key));
                assert!(map.find(&key).is_end());
                assert!(!map.contains_key(&key));
            }

            assert!(map.is_empty());
            assert!(map.iter().next().is_none());
        }

        #[test]
        fn duplicate_insert() {
            let map = $map::new();
            for key in 0..100_i32 {
                map.insert(key, key * 10);
            }

            let (cursor, inserted) = map.insert(5, 5 * 10);
            assert!(!inserted);
            assert_eq!(cursor.value(), Some(&50));

            let (cursor, inserted) = map.insert(5, -1);
            assert!(!inserted);
            assert_eq!(cursor.key(), Some(&5));
            assert_eq!(cursor.value(), Some(&50));
            assert_eq!(cursor, map.find(&5));

            assert_eq!(map.len(), 100);
            assert_eq!(map.get(&5), Some(50));
        }

        #[test]
        fn duplicate_insert_drops_new_entry() {
            let map = $map::new();
            let first = Rc::new(());
            let second = Rc::new(());

            assert!(map.insert(1, Rc::clone(&first)).1);
            assert!(!map.insert(1, Rc::clone(&second)).1);

            assert_eq!(Rc::strong_count(&first), 2);
            assert_eq!(Rc::strong_count(&second), 1);

            drop(map);
            assert_eq!(Rc::strong_count(&first), 1);
        }

        #[test]
        fn reinsert_after_erase() {
            let map = $map::new();

            assert!(map.insert("key", 1).1);
            assert!(map.erase(&"key"));
            assert!(!map.erase(&"key"));

            let (cursor, inserted) = map.insert("key", 2);
            assert!(inserted);
            assert_eq!(cursor.value(), Some(&2));
            drop(cursor);

            assert_eq!(map.get(&"key"), Some(2));
            assert_eq!(map.len(), 1);
        }

        // ================================
        //  Ordering
        // ================================

        #[test]
        fn iteration_is_ordered() {
            let map = $map::new();
            let mut model = BTreeMap::new();
            let mut prng = Rand32::new(0x5EED);

            for _ in 0..2_000 {
                let key = prng.rand_range(0..500);
                let value = prng.rand_u32();
                let inserted = map.insert(key, value).1;
                assert_eq!(inserted, !model.contains_key(&key));
                model.entry(key).or_insert(value);

                if prng.rand_range(0..4) == 0 {
                    let erased_key = prng.rand_range(0..500);
                    assert_eq!(map.erase(&erased_key), model.remove(&erased_key).is_some());
                }
            }

            assert_eq!(map.len(), model.len());
            assert!(
                map.iter()
                    .map(|entry| (*entry.key(), *entry.value()))
                    .eq(model.iter().map(|(&key, &value)| (key, value))),
            );
        }

        #[test]
        fn custom_comparator() {
            let map: $map<i32, char, _> = SkipMap::with_comparator(FromLess(
                |lhs: &i32, rhs: &i32| lhs > rhs,
            ));

            for (key, value) in [(2, 'b'), (3, 'c'), (1, 'a')] {
                map.insert(key, value);
            }

            assert!(map.iter().map(|entry| *entry.key()).eq([3, 2, 1]));
            assert_eq!(map.lower_bound(&4).key(), Some(&3));
            assert_eq!(map.upper_bound(&2).key(), Some(&1));
            assert!(map.upper_bound(&1).is_end());
        }

        #[test]
        fn closure_comparator() {
            let by_len = |lhs: &&str, rhs: &&str| lhs.len().cmp(&rhs.len());
            let map: $map<&str, u8, _> = SkipMap::with_comparator(by_len);

            assert!(map.insert("ab", 0).1);
            assert!(map.insert("a", 1).1);
            // Equal under the comparator, despite being different strings.
            assert!(!map.insert("xy", 2).1);

            assert_eq!(map.get(&"zz"), Some(0));
            assert!(map.iter().map(|entry| *entry.value()).eq([1, 0]));
        }

        // ================================
        //  Bounds and Ranges
        // ================================

        #[test]
        fn bounds() {
            let map = $map::new();
            for key in (0..20_i32).step_by(2) {
                map.insert(key, ());
            }

            assert_eq!(map.lower_bound(&-5).key(), Some(&0));
            assert_eq!(map.lower_bound(&5).key(), Some(&6));
            assert_eq!(map.lower_bound(&6).key(), Some(&6));
            assert_eq!(map.upper_bound(&5).key(), Some(&6));
            assert_eq!(map.upper_bound(&6).key(), Some(&8));
            assert_eq!(map.lower_bound(&18).key(), Some(&18));
            assert!(map.upper_bound(&18).is_end());
            assert!(map.lower_bound(&19).is_end());
            assert!(map.find(&5).is_end());
        }

        #[test]
        fn bound_traversal() {
            let map = $map::new();
            for key in 0..100_i32 {
                assert!(map.insert(key, key * 10).1);
            }
            assert!(!map.insert(5, 5 * 10).1);

            assert!(map.erase(&1));
            assert!(map.iter().map(|entry| *entry.key()).eq((0..100).filter(|&key| key != 1)));

            assert!(map.erase(&51));
            assert!(map.erase(&50));

            let mut lower = map.lower_bound(&50);
            let upper = map.upper_bound(&99);
            assert!(upper.is_end());

            let mut traversed = Vec::new();
            while lower != upper {
                let (&key, &value) = lower.entry().unwrap();
                traversed.push((key, value));
                lower.advance();
            }

            let expected = (52..100).map(|key| (key, key * 10)).collect::<Vec<_>>();
            assert_eq!(traversed, expected);
            assert_eq!(traversed.first(), Some(&(52, 520)));
            assert_eq!(traversed.last(), Some(&(99, 990)));

            let ranged = map
                .range(50..=99)
                .map(|entry| (*entry.key(), *entry.value()))
                .collect::<Vec<_>>();
            assert_eq!(ranged, expected);
        }

        #[test]
        fn range_bounds() {
            let map: $map<u32, ()> = (0..10).map(|key| (key, ())).collect();

            fn keys<'a, I, R>(entries: I) -> Vec<u32>
            where
                I: Iterator<Item = Entry<'a, u32, (), R>>,
                R: Reclaim + 'a,
            {
                entries.map(|entry| *entry.key()).collect()
            }

            assert_eq!(keys(map.range(..)), (0..10).collect::<Vec<_>>());
            assert_eq!(keys(map.range(3..6)), [3, 4, 5]);
            assert_eq!(keys(map.range(3..=6)), [3, 4, 5, 6]);
            assert_eq!(keys(map.range(..2)), [0, 1]);
            assert_eq!(keys(map.range(8..)), [8, 9]);
            assert_eq!(
                keys(map.range((Bound::Excluded(3), Bound::Excluded(6)))),
                [4, 5],
            );
            assert_eq!(keys(map.range(20..30)), Vec::<u32>::new());
            #[expect(clippy::reversed_empty_ranges, reason = "test an empty range")]
            let backwards = map.range(6..3);
            assert_eq!(keys(backwards), Vec::<u32>::new());
        }

        // ================================
        //  Cursors
        // ================================

        #[test]
        fn cursor_advance_and_reset() {
            let map = $map::new();
            for key in [10, 20, 30] {
                map.insert(key, key + 1);
            }

            let mut cursor = map.begin();
            assert_eq!(cursor.entry(), Some((&10, &11)));

            let snapshot = cursor.clone();
            cursor.advance();
            assert_eq!(cursor.key(), Some(&20));
            assert_ne!(cursor, snapshot);
            assert_eq!(snapshot.key(), Some(&10));

            cursor.advance();
            assert_eq!(cursor, map.find(&30));
            cursor.advance();
            assert!(cursor.is_end());
            assert_eq!(cursor, map.end());

            let mut cursor = map.find(&20);
            assert!(!cursor.is_end());
            cursor.reset();
            assert!(cursor.is_end());
            assert!(cursor.key().is_none());

            let _check_that_debug_works = format!("{snapshot:?}");
        }

        #[test]
        fn iterator_entries_outlive_iterator() {
            let map = $map::new();
            for key in 0..5_u8 {
                map.insert(key, key.to_string());
            }

            let entries = map.iter().collect::<Vec<_>>();
            assert_eq!(entries.len(), 5);
            for (index, entry) in (0..).zip(&entries) {
                assert_eq!(*entry.key(), index);
                assert_eq!(entry.value(), &index.to_string());
                assert!(!entry.is_removed());
            }

            let mut iter = map.iter();
            assert_eq!(iter.by_ref().take(5).count(), 5);
            assert!(iter.next().is_none());
            assert!(iter.next().is_none());

            let _check_that_debug_works = format!("{:?}", entries[0]);
        }

        #[test]
        fn into_iterator_and_extend() {
            let mut map = $map::new();
            map.extend([(3, 'c'), (1, 'a')]);
            map.extend([(2, 'b'), (1, 'z')]);

            let mut keys = Vec::new();
            for entry in &map {
                keys.push(*entry.key());
            }
            assert_eq!(keys, [1, 2, 3]);
            assert_eq!(map.get(&1), Some('a'));
            assert_eq!(format!("{map:?}"), "{1: 'a', 2: 'b', 3: 'c'}");
        }

        // ================================
        //  Options
        // ================================

        #[test]
        fn with_options() {
            let options = SkipMapOptions {
                max_height:       4,
                branching_factor: 2,
                seed:             Some(99),
                sweep_threshold:  8,
            };
            let map = $map::with_options(OrdComparator, &options).unwrap();
            assert_eq!(map.max_height(), 4);

            for key in (0..1_000_u32).rev() {
                map.insert(key, ());
            }
            assert_eq!(map.len(), 1_000);
            assert!(map.iter().map(|entry| *entry.key()).eq(0..1_000));

            let bad = SkipMapOptions { branching_factor: 0, ..options };
            let result = $map::<u32, ()>::with_options(OrdComparator, &bad);
            assert_eq!(result.err(), Some(OptionsError::BranchingFactor(0)));
        }

        #[test]
        fn drops_every_entry() {
            let counter = Rc::new(());
            {
                let map = $map::new();
                for key in 0..50 {
                    map.insert(key, Rc::clone(&counter));
                }
                for key in (0..50).step_by(3) {
                    map.erase(&key);
                }
                assert_eq!(map.pending_reclamation(), 0);
                assert_eq!(Rc::strong_count(&counter), 1 + map.len());
            }
            assert_eq!(Rc::strong_count(&counter), 1);
        }

        // ================================
        //  Multithreaded
        // ================================

        #[test]
        fn concurrent_disjoint_inserts() {
            const THREADS: u32 = 4;
            const PER_THREAD: u32 = 500;

            let map = $map::new();

            thread::scope(|scope| {
                for thread in 0..THREADS {
                    let map = &map;
                    scope.spawn(move || {
                        for index in 0..PER_THREAD {
                            let key = index * THREADS + thread;
                            assert!(map.insert(key, key * 10).1);
                        }
                    });
                }
            });

            let total = THREADS * PER_THREAD;
            assert_eq!(map.len(), total as usize);
            assert!(map.iter().map(|entry| *entry.key()).eq(0..total));
            assert!(map.iter().all(|entry| *entry.value() == *entry.key() * 10));
        }

        #[test]
        fn concurrent_duplicate_inserts() {
            const THREADS: u32 = 4;

            let map = $map::new();
            let successes = AtomicUsize::new(0);

            thread::scope(|scope| {
                for thread in 0..THREADS {
                    let map = &map;
                    let successes = &successes;
                    scope.spawn(move || {
                        for key in 0..300_u32 {
                            let (cursor, inserted) = map.insert(key, thread);
                            assert_eq!(cursor.key(), Some(&key));
                            if inserted {
                                successes.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });

            assert_eq!(successes.load(Ordering::Relaxed), 300);
            assert_eq!(map.len(), 300);
        }

        #[test]
        fn concurrent_inserts_and_erases() {
            const THREADS: u32 = 4;
            const KEYS_PER_THREAD: u32 = 200;

            let map = $map::new();

            thread::scope(|scope| {
                for thread in 0..THREADS {
                    let map = &map;
                    scope.spawn(move || {
                        let mut prng = Rand32::new(u64::from(thread) + 1);
                        let mut present = BTreeSet::new();

                        for _ in 0..2_000 {
                            let key = prng.rand_range(0..KEYS_PER_THREAD) * THREADS + thread;
                            if prng.rand_range(0..2) == 0 {
                                assert_eq!(map.insert(key, key).1, present.insert(key));
                            } else {
                                assert_eq!(map.erase(&key), present.remove(&key));
                            }
                        }

                        for key in &present {
                            assert_eq!(map.get(key), Some(*key));
                        }
                    });
                }

                // A reader which only checks that the order is never violated.
                let map = &map;
                scope.spawn(move || {
                    for _ in 0..20 {
                        let mut previous = None;
                        for entry in map {
                            let key = *entry.key();
                            assert!(previous.is_none_or(|previous| previous < key));
                            assert_eq!(*entry.value(), key);
                            previous = Some(key);
                        }
                    }
                });
            });

            let keys = map.iter().map(|entry| *entry.key()).collect::<Vec<_>>();
            assert_eq!(keys.len(), map.len());
            assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        }
    };
}

pub(crate) use tests_for_all_backends;
