use subheap::{DictPolicy, DropWithHeap, Heap, HeapConfig, HeapError, HeapId, Type};

fn heap() -> Heap {
    Heap::new(HeapConfig::new(100_000)).unwrap()
}

/// Builds `[0, 1, ..., n - 1]` and releases the element references.
fn int_list(heap: &mut Heap, n: i64) -> HeapId {
    let items: Vec<HeapId> = (0..n).map(|i| heap.new_int(i).unwrap()).collect();
    let list = heap.new_list(&items).unwrap();
    items.drop_with_heap(heap);
    list
}

macro_rules! list_index_tests {
    ($($name:ident: $index:expr, $expected:expr;)*) => {
        $(
            paste::item! {
                #[test]
                fn [< list_get_ $name >]() {
                    let mut heap = heap();
                    let list = int_list(&mut heap, 5);
                    let result = heap.list_get(list, $index).map(|id| {
                        let repr = heap.py_repr(id);
                        heap.dec_ref(id);
                        repr
                    });
                    let expected: Result<&str, HeapError> = $expected;
                    assert_eq!(result.as_deref().map_err(Clone::clone), expected);
                    heap.dec_ref(list);
                    assert_eq!(heap.mem().refs_in_use, 3);
                }
            }
        )*
    }
}

list_index_tests! {
    first: 0, Ok("0");
    last: 4, Ok("4");
    negative_last: -1, Ok("4");
    negative_first: -5, Ok("0");
    past_end: 5, Err(HeapError::IndexError { index: 5, len: 5 });
    before_start: -6, Err(HeapError::IndexError { index: -6, len: 5 });
}

#[test]
fn list_append_grows_by_doubling() {
    let mut heap = heap();
    let list = heap.list_with_capacity(0).unwrap();
    let mut capacities = Vec::new();
    for i in 0..17 {
        let item = heap.new_int(i).unwrap();
        heap.list_append(list, item).unwrap();
        heap.dec_ref(item);
        let subheap::HeapData::List(header) = heap.get(list) else {
            panic!("not a list");
        };
        let subheap::HeapData::Slots(slots) = heap.get(header.slots()) else {
            panic!("not a slot array");
        };
        capacities.push(slots.capacity());
    }
    assert_eq!(capacities[0], 8);
    assert_eq!(capacities[8], 16);
    assert_eq!(capacities[16], 32);
    assert_eq!(heap.py_len(list), Ok(17));
    heap.verify().unwrap();
    heap.dec_ref(list);
    assert_eq!(heap.mem().bytes_in_use, 72);
}

#[test]
fn list_delete_shifts_the_tail() {
    let mut heap = heap();
    let list = int_list(&mut heap, 4);
    heap.list_delete(list, 1).unwrap();
    assert_eq!(heap.py_repr(list), "[0, 2, 3]");
    heap.list_delete(list, -1).unwrap();
    assert_eq!(heap.py_repr(list), "[0, 2]");
    assert_eq!(heap.list_delete(list, 2), Err(HeapError::IndexError { index: 2, len: 2 }));
    heap.verify().unwrap();
    heap.dec_ref(list);
    assert_eq!(heap.mem().refs_in_use, 3);
}

#[test]
fn list_set_replaces_and_releases() {
    let mut heap = heap();
    let list = int_list(&mut heap, 2);
    let word = heap.new_str("two").unwrap();
    heap.list_set(list, -1, word).unwrap();
    heap.dec_ref(word);
    assert_eq!(heap.py_repr(list), r#"[0, "two"]"#);
    assert_eq!(heap.py_str(word), "two");
    // int 1 is gone; int 0, the string, the list and its slot array remain
    assert_eq!(heap.mem().refs_in_use, 3 + 2 + 2);
    heap.dec_ref(list);
}

#[test]
fn subscript_type_errors() {
    let mut heap = heap();
    let list = int_list(&mut heap, 1);
    let key = heap.new_str("0").unwrap();
    let number = heap.new_int(3).unwrap();

    let err = heap.getitem(list, key).unwrap_err();
    assert_eq!(err.summary(), "TypeError: list indices must be integers, not str");
    let err = heap.getitem(number, key).unwrap_err();
    assert_eq!(err.summary(), "TypeError: 'int' object is not subscriptable");
    let err = heap.setitem(key, number, number).unwrap_err();
    assert_eq!(err.summary(), "TypeError: 'str' object does not support item assignment");
    let err = heap.py_len(number).unwrap_err();
    assert_eq!(err.summary(), "TypeError: object of type 'int' has no len()");
    let err = heap.getitem(list, number).unwrap_err();
    assert_eq!(err.summary(), "IndexError: list index out of range");

    vec![list, key, number].drop_with_heap(&mut heap);
    assert_eq!(heap.mem().refs_in_use, 3);
}

#[test]
fn dict_overwrite_with_own_value() {
    let mut heap = heap();
    let dict = heap.new_dict().unwrap();
    let key = heap.new_str("k").unwrap();
    let value = heap.new_str("v").unwrap();
    heap.dict_set(dict, key, value).unwrap();
    heap.dec_ref(value);

    // d[k] = d[k]
    let current = heap.dict_get(dict, key).unwrap();
    heap.dict_set(dict, key, current).unwrap();
    heap.dec_ref(current);
    assert_eq!(heap.py_repr(dict), r#"{"k": "v"}"#);
    assert_eq!(heap.get_refcount(current), 1);

    vec![key, dict].drop_with_heap(&mut heap);
    assert_eq!(heap.mem().refs_in_use, 3);
}

#[test]
fn bool_and_int_are_distinct_keys() {
    let mut heap = heap();
    let dict = heap.new_dict().unwrap();
    let one = heap.new_int(1).unwrap();
    let yes = heap.bool_value(true);
    heap.dict_set(dict, one, one).unwrap();
    heap.dict_set(dict, yes, yes).unwrap();
    assert_eq!(heap.dict_len(dict), Ok(2));
    assert_eq!(heap.py_repr(dict), "{1: 1, True: True}");
    vec![one, yes, dict].drop_with_heap(&mut heap);
}

#[test]
fn deleted_keys_stay_deleted_across_resizes() {
    let mut heap = heap();
    let dict = heap.new_dict().unwrap();
    let key = heap.new_int(3).unwrap();
    for round in 0..2 {
        let value = heap.new_int(round).unwrap();
        heap.dict_set(dict, key, value).unwrap();
        heap.dec_ref(value);
        heap.dict_delete(dict, key).unwrap();
        assert_eq!(heap.dict_get(dict, key), Err(HeapError::KeyError("3".to_string())));
        // push the table through a rebuild before the next round
        for filler in 0..20 {
            let filler_key = heap.new_int(100 + filler + round * 100).unwrap();
            heap.dict_set(dict, filler_key, filler_key).unwrap();
            heap.dict_delete(dict, filler_key).unwrap();
            heap.dec_ref(filler_key);
        }
    }
    assert!(!heap.dict_contains(dict, key).unwrap());
    assert_eq!(heap.dict_len(dict), Ok(0));
    heap.verify().unwrap();
    vec![key, dict].drop_with_heap(&mut heap);
    assert_eq!(heap.mem().refs_in_use, 3);
}

#[test]
fn tombstones_trigger_rebuild() {
    let mut heap = heap();
    let dict = heap.new_dict().unwrap();
    for i in 0..8 {
        let key = heap.new_int(i).unwrap();
        heap.dict_set(dict, key, key).unwrap();
        heap.dict_delete(dict, key).unwrap();
        heap.dec_ref(key);
    }
    let subheap::HeapData::Dict(header) = heap.get(dict) else {
        panic!("not a dict");
    };
    // the eighth insert filled half of the 16 slots, counting tombstones, and the
    // rebuild kept only that key; deleting it left a single tombstone behind
    assert_eq!(header.len(), 0);
    assert_eq!(header.occupied(), 1);
    let subheap::HeapData::Slots(keys) = heap.get(header.keys()) else {
        panic!("not a slot array");
    };
    assert_eq!(keys.capacity(), 32);
    heap.dec_ref(dict);
}

#[test]
fn dict_items_follow_slot_order() {
    let mut heap = heap();
    let dict = heap.new_dict().unwrap();
    for i in [33, 1, 17] {
        let key = heap.new_int(i).unwrap();
        heap.dict_set(dict, key, key).unwrap();
        heap.dec_ref(key);
    }
    let keys: Vec<String> = heap
        .dict_items(dict)
        .unwrap()
        .into_iter()
        .map(|(key, _)| heap.py_repr(key))
        .collect();
    // 33 % 16 = 1 claims slot 1 first; 1 and 17 probe on to 2 and 3
    assert_eq!(keys, ["33", "1", "17"]);
    heap.dec_ref(dict);
}

#[test]
fn failed_rebuild_rolls_back_the_insert() {
    // baseline 72, dict 240, seven int keys 224, the eighth key 32
    let mut heap = Heap::new(HeapConfig::new(600)).unwrap();
    let dict = heap.new_dict().unwrap();
    for i in 0..7 {
        let key = heap.new_int(i).unwrap();
        heap.dict_set(dict, key, subheap::NONE_ID).unwrap();
        heap.dec_ref(key);
    }
    let key = heap.new_int(7).unwrap();
    let before = heap.mem();

    let err = heap.dict_set(dict, key, subheap::NONE_ID).unwrap_err();
    assert_eq!(
        err,
        HeapError::OutOfMemory {
            requested: 160,
            in_use: 568,
            capacity: 600
        }
    );
    assert_eq!(heap.mem(), before);
    assert_eq!(heap.get_refcount(key), 1);
    assert_eq!(heap.dict_len(dict), Ok(7));
    assert!(!heap.dict_contains(dict, key).unwrap());
    heap.verify().unwrap();

    vec![key, dict].drop_with_heap(&mut heap);
    assert_eq!(heap.mem().bytes_in_use, 72);
}

#[test]
fn custom_policy_sizes_tables() {
    let policy = DictPolicy {
        min_capacity: 4,
        max_load_percent: 75,
        growth_factor: 4,
    };
    let mut heap = Heap::new(HeapConfig::new(10_000).dict_policy(policy)).unwrap();
    let dict = heap.new_dict().unwrap();
    for i in 0..3 {
        let key = heap.new_int(i).unwrap();
        heap.dict_set(dict, key, key).unwrap();
        heap.dec_ref(key);
    }
    let subheap::HeapData::Dict(header) = heap.get(dict) else {
        panic!("not a dict");
    };
    let subheap::HeapData::Slots(keys) = heap.get(header.keys()) else {
        panic!("not a slot array");
    };
    assert_eq!(keys.capacity(), 16);
    assert_eq!(heap.py_repr(dict), "{0: 0, 1: 1, 2: 2}");
    heap.dec_ref(dict);
}

macro_rules! truthiness_tests {
    ($($name:ident: $build:expr, $truthy:expr, $len:expr;)*) => {
        $(
            paste::item! {
                #[test]
                fn [< truthiness_ $name >]() {
                    let mut heap = heap();
                    let build: fn(&mut Heap) -> HeapId = $build;
                    let id = build(&mut heap);
                    assert_eq!(heap.py_bool(id), $truthy);
                    let len: Option<usize> = $len;
                    assert_eq!(heap.py_len(id).ok(), len);
                    heap.dec_ref(id);
                    assert_eq!(heap.mem().refs_in_use, 3);
                }
            }
        )*
    }
}

truthiness_tests! {
    none: |heap| heap.none(), false, None;
    false_value: |heap| heap.bool_value(false), false, None;
    zero: |heap| heap.new_int(0).unwrap(), false, None;
    negative: |heap| heap.new_int(-3).unwrap(), true, None;
    empty_str: |heap| heap.new_str("").unwrap(), false, Some(0);
    unicode_str: |heap| heap.new_str("héllo").unwrap(), true, Some(5);
    empty_list: |heap| heap.list_with_capacity(4).unwrap(), false, Some(0);
    list: |heap| int_list(heap, 2), true, Some(2);
    empty_dict: |heap| heap.new_dict().unwrap(), false, Some(0);
}

#[test]
fn hashing_is_deterministic() {
    let mut heap = heap();
    let a = heap.new_str("abc").unwrap();
    let b = heap.new_str("abc").unwrap();
    let n = heap.new_int(-1).unwrap();
    let list = heap.list_with_capacity(0).unwrap();
    assert_eq!(heap.py_hash(a), heap.py_hash(b));
    assert_eq!(heap.py_hash(n), Ok(u64::MAX));
    assert_eq!(heap.py_hash(subheap::NONE_ID), Ok(u64::MAX));
    assert_eq!(heap.py_hash(subheap::TRUE_ID), Ok(1));
    assert_eq!(
        heap.py_hash(list).unwrap_err().summary(),
        "TypeError: unhashable type: 'list'"
    );
    assert_eq!(heap.py_type(list), Type::List);
    assert_eq!(heap.py_type(subheap::NONE_ID).to_string(), "NoneType");
    vec![a, b, n, list].drop_with_heap(&mut heap);
}

#[test]
fn equality_compares_contents() {
    let mut heap = heap();
    let a = int_list(&mut heap, 3);
    let b = int_list(&mut heap, 3);
    let c = int_list(&mut heap, 2);
    assert!(heap.py_eq(a, b));
    assert!(!heap.py_eq(a, c));

    let left = heap.new_dict().unwrap();
    let right = heap.new_dict().unwrap();
    for dict in [left, right] {
        heap.dict_set(dict, a, subheap::TRUE_ID).unwrap_err();
        let key = heap.new_str("k").unwrap();
        heap.dict_set(dict, key, a).unwrap();
        heap.dec_ref(key);
    }
    assert!(heap.py_eq(left, right));
    assert!(!heap.py_eq(subheap::TRUE_ID, subheap::FALSE_ID));

    vec![a, b, c, left, right].drop_with_heap(&mut heap);
    assert_eq!(heap.mem().refs_in_use, 3);
}

#[test]
fn equality_of_self_referencing_lists_terminates() {
    let mut heap = heap();
    let a = heap.list_with_capacity(1).unwrap();
    let b = heap.list_with_capacity(1).unwrap();
    heap.list_append(a, a).unwrap();
    heap.list_append(b, b).unwrap();
    assert!(!heap.py_eq(a, b));
    assert!(heap.py_eq(a, a));
    heap.collect([]);
    assert_eq!(heap.mem().refs_in_use, 3);
}
