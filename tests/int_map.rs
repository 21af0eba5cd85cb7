use tessera::map::IntMap;

#[test]
fn test_put_get_remove() {
    let mut map: IntMap<&'static str> = IntMap::new(16);
    assert!(map.is_empty());

    map.put(7, "seven");
    map.put(23, "twenty-three");
    assert_eq!(map.count(), 2);
    assert_eq!(map.get(7), Some(&"seven"));
    assert_eq!(map.get(23), Some(&"twenty-three"));
    assert_eq!(map.get(8), None);

    // A value mismatch refuses the removal and leaves the entry intact:
    // the caller held a stale reference to a reused handle.
    assert!(!map.remove(7, &"eight"));
    assert_eq!(map.get(7), Some(&"seven"));

    assert!(map.remove(7, &"seven"));
    assert_eq!(map.get(7), None);
    assert_eq!(map.count(), 1);
}

#[test]
fn test_chained_bucket_removal() {
    // Two buckets force every odd key into one chain.
    let mut map: IntMap<i32> = IntMap::new(2);
    map.put(1, 10);
    map.put(3, 30);
    map.put(5, 50);
    assert_eq!(map.count(), 3);

    // Unlink the middle of the chain.
    assert!(map.remove(3, &30));
    assert_eq!(map.get(1), Some(&10));
    assert_eq!(map.get(5), Some(&50));
    assert_eq!(map.get(3), None);

    assert!(map.remove(1, &10));
    assert!(map.remove(5, &50));
    assert!(map.is_empty());
}

#[test]
fn test_replace_swaps_value_under_same_key() {
    let mut map: IntMap<&'static str> = IntMap::new(8);
    map.put(4, "sentry");

    let displaced = map.replace(4, &"sentry", "protocol");
    assert_eq!(displaced, "sentry");
    assert_eq!(map.get(4), Some(&"protocol"));
    assert_eq!(map.count(), 1);
}

#[test]
#[should_panic(expected = "replace target not found")]
fn test_replace_succeeds_exactly_once() {
    let mut map: IntMap<&'static str> = IntMap::new(8);
    map.put(4, "sentry");

    map.replace(4, &"sentry", "protocol");
    // The old value is gone; promoting an already-promoted entry is a
    // logic defect.
    map.replace(4, &"sentry", "protocol");
}

#[test]
#[should_panic(expected = "power of two")]
fn test_bucket_count_must_be_power_of_two() {
    let _ = IntMap::<i32>::new(12);
}

#[test]
fn test_drain_empties_the_map() {
    let mut map: IntMap<i32> = IntMap::new(4);
    for key in 0..10 {
        map.put(key, key * 100);
    }

    let mut values = map.drain();
    values.sort();
    assert_eq!(values.len(), 10);
    assert_eq!(values[9], 900);
    assert!(map.is_empty());
    assert_eq!(map.get(3), None);
}
